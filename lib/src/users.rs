//! Three-way merging of the Unix identity databases.
//!
//! Four colon-separated databases (passwd, shadow, group, gshadow) are
//! reconciled across three sources: the host's live `/etc`, the
//! `/usr/etc` baseline left behind by the previously applied image, and
//! the new image's `/etc`. The new image's records form the base set;
//! strictly local additions (present live, absent from the baseline)
//! survive when their UID/GID is in the regular-account range; locally
//! added group members are re-attached to groups that exist in all
//! three sources.
//!
//! The merges are pure functions over name-keyed maps; reading and
//! writing the files is a thin shell around them. BTreeMap keeps the
//! output order deterministic (sorted by name within each policy
//! branch).

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;

use crate::errors::Error;
use crate::paths::SystemPaths;
use crate::rootfs::Rootfs;

/// First UID/GID of the regular (non-system) account range. Local
/// additions below this are system accounts owned by the image.
const ID_RANGE_START: u32 = 1000;

/// Records of one database: name (field 0) to the full line.
pub(crate) type Records = BTreeMap<String, String>;

/// Parse a colon-separated database into records. Blank lines are
/// skipped; surrounding whitespace is trimmed.
pub(crate) fn parse_db(content: &str) -> Records {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let name = line.split(':').next().unwrap_or(line);
            (name.to_string(), line.to_string())
        })
        .collect()
}

/// Colon-separated field `idx` of `line`, or a malformed-database error
/// naming `db`.
fn field<'a>(line: &'a str, idx: usize, db: &'static str) -> Result<&'a str, Error> {
    line.split(':').nth(idx).ok_or(Error::MalformedDatabase(db))
}

/// Numeric field 2 (the UID of a passwd record, the GID of a group
/// record).
fn id_field(line: &str, db: &'static str) -> Result<u32, Error> {
    field(line, 2, db)?
        .parse()
        .map_err(|_| Error::MalformedDatabase(db))
}

/// Merge passwd records.
///
/// The output is every record of `new`, followed by the records of
/// `host` that are absent from both `baseline` and `new` and whose UID
/// is in the regular range. Returns the merged lines; the group merges
/// consume them to decide which members still resolve.
pub(crate) fn merge_passwd(
    host: &Records,
    baseline: &Records,
    new: &Records,
) -> Result<Vec<String>, Error> {
    let mut merged: Vec<String> = new.values().cloned().collect();
    for (name, line) in host {
        if baseline.contains_key(name) {
            continue;
        }
        if id_field(line, "passwd")? >= ID_RANGE_START && !new.contains_key(name) {
            merged.push(line.clone());
        }
    }
    Ok(merged)
}

/// Merge shadow records. Same shape as [`merge_passwd`], except the
/// survival gate reads the account's UID through `uid_of` (a lookup
/// into the host passwd database).
pub(crate) fn merge_shadow(
    host: &Records,
    baseline: &Records,
    new: &Records,
    uid_of: impl Fn(&str) -> Result<u32, Error>,
) -> Result<Vec<String>, Error> {
    let mut merged: Vec<String> = new.values().cloned().collect();
    for (name, line) in host {
        if baseline.contains_key(name) {
            continue;
        }
        if uid_of(name)? >= ID_RANGE_START && !new.contains_key(name) {
            merged.push(line.clone());
        }
    }
    Ok(merged)
}

/// Merge group records, re-attaching locally added members.
///
/// `merged_passwd` is the output of [`merge_passwd`]; only members
/// whose account survived into it are grafted.
pub(crate) fn merge_group(
    host: &Records,
    baseline: &Records,
    new: &Records,
    merged_passwd: &[String],
) -> Result<Vec<String>, Error> {
    merge_group_like(host, baseline, new, merged_passwd, "group", |_, line| {
        id_field(line, "group")
    })
}

/// Merge gshadow records. Identical in structure to [`merge_group`],
/// except the local-group gate reads the GID from the host *group*
/// database, since gshadow records carry no GID themselves.
pub(crate) fn merge_gshadow(
    host: &Records,
    baseline: &Records,
    new: &Records,
    host_group: &Records,
    merged_passwd: &[String],
) -> Result<Vec<String>, Error> {
    merge_group_like(host, baseline, new, merged_passwd, "gshadow", |name, _| {
        let line = host_group
            .get(name)
            .ok_or(Error::MalformedDatabase("gshadow"))?;
        id_field(line, "gshadow")
    })
}

fn merge_group_like(
    host: &Records,
    baseline: &Records,
    new: &Records,
    merged_passwd: &[String],
    db: &'static str,
    gid_of: impl Fn(&str, &str) -> Result<u32, Error>,
) -> Result<Vec<String>, Error> {
    let merged_names: BTreeSet<&str> = merged_passwd
        .iter()
        .filter_map(|line| line.split(':').next())
        .collect();

    // Groups introduced by the new image.
    let mut out: Vec<String> = new
        .iter()
        .filter(|(name, _)| !baseline.contains_key(*name))
        .map(|(_, line)| line.clone())
        .collect();

    // Groups present in all three sources: take the image's record and
    // graft on the members the administrator added locally, as long as
    // their account survived the passwd merge.
    for (name, new_line) in new {
        if !baseline.contains_key(name) {
            continue;
        }
        let Some(host_line) = host.get(name) else {
            continue;
        };
        let mut entry = new_line.clone();
        for member in field(host_line, 3, db)?.split(',') {
            let (present, empty) = {
                let members = field(&entry, 3, db)?;
                (members.split(',').any(|m| m == member), members.is_empty())
            };
            if member.is_empty() || present || !merged_names.contains(member) {
                continue;
            }
            if !empty {
                entry.push(',');
            }
            entry.push_str(member);
        }
        out.push(entry);
    }

    // Strictly local groups in the regular GID range.
    for (name, line) in host {
        if baseline.contains_key(name) {
            continue;
        }
        if gid_of(name, line)? >= ID_RANGE_START && !new.contains_key(name) {
            out.push(line.clone());
        }
    }

    Ok(out)
}

/// Merge all four identity databases from the three `/etc` views into
/// the staged `/.new.etc`, in the fixed order passwd, shadow, group,
/// gshadow.
#[context("Merging identity databases")]
pub(crate) fn merge_identity(paths: &SystemPaths, new_rootfs: &Rootfs) -> Result<()> {
    let read = |path: &Utf8Path| -> Result<Records> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;
        Ok(parse_db(&content))
    };
    let host_etc = paths.etc();
    let base_etc = paths.usr_etc();
    let image_etc = new_rootfs.path().join("etc");
    let staged_etc = paths.new_etc();

    let host_passwd = read(&host_etc.join("passwd"))?;
    let merged_passwd = merge_passwd(
        &host_passwd,
        &read(&base_etc.join("passwd"))?,
        &read(&image_etc.join("passwd"))?,
    )?;
    write_db(&staged_etc.join("passwd"), &merged_passwd)?;

    let merged_shadow = merge_shadow(
        &read(&host_etc.join("shadow"))?,
        &read(&base_etc.join("shadow"))?,
        &read(&image_etc.join("shadow"))?,
        |name| {
            let line = host_passwd
                .get(name)
                .ok_or(Error::MalformedDatabase("shadow"))?;
            id_field(line, "shadow")
        },
    )?;
    write_db(&staged_etc.join("shadow"), &merged_shadow)?;

    let host_group = read(&host_etc.join("group"))?;
    let merged_group = merge_group(
        &host_group,
        &read(&base_etc.join("group"))?,
        &read(&image_etc.join("group"))?,
        &merged_passwd,
    )?;
    write_db(&staged_etc.join("group"), &merged_group)?;

    let merged_gshadow = merge_gshadow(
        &read(&host_etc.join("gshadow"))?,
        &read(&base_etc.join("gshadow"))?,
        &read(&image_etc.join("gshadow"))?,
        &host_group,
        &merged_passwd,
    )?;
    write_db(&staged_etc.join("gshadow"), &merged_gshadow)?;

    Ok(())
}

fn write_db(path: &Utf8Path, records: &[String]) -> Result<()> {
    let mut buf = String::new();
    for record in records {
        buf.push_str(record);
        buf.push('\n');
    }
    std::fs::write(path, buf).with_context(|| format!("Writing {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use similar_asserts::assert_eq;

    fn records(lines: &[&str]) -> Records {
        parse_db(&lines.join("\n"))
    }

    #[test]
    fn test_parse_db() {
        let db = parse_db("root:x:0:0::/root:/bin/bash\n\n  \nbin:x:1:1::/:/sbin/nologin\n");
        assert_eq!(db.len(), 2);
        assert_eq!(db["root"], "root:x:0:0::/root:/bin/bash");
        assert_eq!(db["bin"], "bin:x:1:1::/:/sbin/nologin");
    }

    // A local user absent from the baseline and the new image survives
    // the rebase verbatim, after all of the image's accounts.
    #[test]
    fn test_passwd_local_user_survives() {
        let host = records(&[
            "root:x:0:0::/root:/bin/bash",
            "alice:x:1001:1001::/home/alice:/bin/bash",
        ]);
        let baseline = records(&["root:x:0:0::/root:/bin/bash"]);
        let new = records(&[
            "root:x:0:0::/root:/bin/bash",
            "bin:x:1:1::/:/usr/bin/nologin",
        ]);
        let merged = merge_passwd(&host, &baseline, &new).unwrap();
        assert_eq!(
            merged,
            vec![
                "bin:x:1:1::/:/usr/bin/nologin".to_string(),
                "root:x:0:0::/root:/bin/bash".to_string(),
                "alice:x:1001:1001::/home/alice:/bin/bash".to_string(),
            ]
        );
    }

    // A system account is always taken from the new image, even when
    // the host's copy differs.
    #[test]
    fn test_passwd_system_account_rewritten() {
        let host = records(&["sshd:x:74:74::/:/usr/sbin/nologin"]);
        let baseline = records(&["sshd:x:74:74::/:/usr/sbin/nologin"]);
        let new = records(&["sshd:x:22:22::/:/sbin/nologin"]);
        let merged = merge_passwd(&host, &baseline, &new).unwrap();
        assert_eq!(merged, vec!["sshd:x:22:22::/:/sbin/nologin".to_string()]);
    }

    // Local additions below the regular-account range do not survive.
    #[test]
    fn test_passwd_local_system_account_dropped() {
        let host = records(&["svc:x:999:999::/:/sbin/nologin"]);
        let baseline = records(&[]);
        let new = records(&["root:x:0:0::/root:/bin/bash"]);
        let merged = merge_passwd(&host, &baseline, &new).unwrap();
        assert_eq!(merged, vec!["root:x:0:0::/root:/bin/bash".to_string()]);
    }

    // Renamed-but-identical accounts: a host record whose name exists
    // in the new image is never duplicated.
    #[test]
    fn test_passwd_name_collision_prefers_image() {
        let host = records(&["alice:x:1001:1001::/home/alice:/bin/bash"]);
        let baseline = records(&[]);
        let new = records(&["alice:x:1500:1500::/home/alice:/bin/zsh"]);
        let merged = merge_passwd(&host, &baseline, &new).unwrap();
        assert_eq!(
            merged,
            vec!["alice:x:1500:1500::/home/alice:/bin/zsh".to_string()]
        );
    }

    #[test]
    fn test_passwd_malformed() {
        // Too few fields on a candidate local record
        let host = records(&["broken:x"]);
        let baseline = records(&[]);
        let new = records(&[]);
        assert!(matches!(
            merge_passwd(&host, &baseline, &new),
            Err(Error::MalformedDatabase("passwd"))
        ));

        // Non-numeric UID
        let host = records(&["broken:x:one-thousand:1000::/:/bin/bash"]);
        assert!(matches!(
            merge_passwd(&host, &baseline, &new),
            Err(Error::MalformedDatabase("passwd"))
        ));
    }

    #[test]
    fn test_shadow_gated_by_passwd_uid() {
        let host_passwd = records(&[
            "alice:x:1001:1001::/home/alice:/bin/bash",
            "svc:x:999:999::/:/sbin/nologin",
        ]);
        let uid_of = |name: &str| {
            let line = host_passwd
                .get(name)
                .ok_or(Error::MalformedDatabase("shadow"))?;
            id_field(line, "shadow")
        };

        let host = records(&["alice:$6$salt$hash:19000::::::", "svc:!:19000::::::"]);
        let baseline = records(&[]);
        let new = records(&["root:$6$other$hash:19500::::::"]);
        let merged = merge_shadow(&host, &baseline, &new, uid_of).unwrap();
        assert_eq!(
            merged,
            vec![
                "root:$6$other$hash:19500::::::".to_string(),
                "alice:$6$salt$hash:19000::::::".to_string(),
            ]
        );
    }

    // A shadow entry with no corresponding passwd record cannot be
    // gated and counts as a malformed shadow database.
    #[test]
    fn test_shadow_orphan_entry_is_malformed() {
        let host_passwd: Records = records(&[]);
        let uid_of = |name: &str| {
            let line = host_passwd
                .get(name)
                .ok_or(Error::MalformedDatabase("shadow"))?;
            id_field(line, "shadow")
        };
        let host = records(&["ghost:!:19000::::::"]);
        let baseline = records(&[]);
        let new = records(&[]);
        assert!(matches!(
            merge_shadow(&host, &baseline, &new, uid_of),
            Err(Error::MalformedDatabase("shadow"))
        ));
    }

    // A locally added member of a group known to all three sources is
    // re-attached to the image's record.
    #[test]
    fn test_group_local_member_preserved() {
        let host = records(&["wheel:x:10:root,alice"]);
        let baseline = records(&["wheel:x:10:root"]);
        let new = records(&["wheel:x:10:root"]);
        let merged_passwd = vec![
            "root:x:0:0::/root:/bin/bash".to_string(),
            "alice:x:1001:1001::/home/alice:/bin/bash".to_string(),
        ];
        let merged = merge_group(&host, &baseline, &new, &merged_passwd).unwrap();
        assert_eq!(merged, vec!["wheel:x:10:root,alice".to_string()]);
    }

    // Grafting onto an empty member list must not leave a leading comma.
    #[test]
    fn test_group_graft_onto_empty_member_list() {
        let host = records(&["docker:x:990:alice"]);
        let baseline = records(&["docker:x:990:"]);
        let new = records(&["docker:x:990:"]);
        let merged_passwd = vec!["alice:x:1001:1001::/home/alice:/bin/bash".to_string()];
        let merged = merge_group(&host, &baseline, &new, &merged_passwd).unwrap();
        assert_eq!(merged, vec!["docker:x:990:alice".to_string()]);
    }

    // Members whose account did not survive the passwd merge are not
    // grafted.
    #[test]
    fn test_group_member_without_account_dropped() {
        let host = records(&["wheel:x:10:root,ghost"]);
        let baseline = records(&["wheel:x:10:root"]);
        let new = records(&["wheel:x:10:root"]);
        let merged_passwd = vec!["root:x:0:0::/root:/bin/bash".to_string()];
        let merged = merge_group(&host, &baseline, &new, &merged_passwd).unwrap();
        assert_eq!(merged, vec!["wheel:x:10:root".to_string()]);
    }

    #[test]
    fn test_group_branches_and_order() {
        let host = records(&[
            "wheel:x:10:root,alice",
            "localgrp:x:1002:alice",
            "oldsvc:x:900:",
        ]);
        let baseline = records(&["wheel:x:10:root", "stale:x:50:"]);
        let new = records(&[
            "wheel:x:10:root",
            "render:x:105:",
            "video:x:104:",
        ]);
        let merged_passwd = vec![
            "root:x:0:0::/root:/bin/bash".to_string(),
            "alice:x:1001:1001::/home/alice:/bin/bash".to_string(),
        ];
        let merged = merge_group(&host, &baseline, &new, &merged_passwd).unwrap();
        // Image-new groups (sorted), then the grafted intersection, then
        // surviving local groups; oldsvc sits below the GID gate and
        // stale was dropped by the image.
        assert_eq!(
            merged,
            vec![
                "render:x:105:".to_string(),
                "video:x:104:".to_string(),
                "wheel:x:10:root,alice".to_string(),
                "localgrp:x:1002:alice".to_string(),
            ]
        );
    }

    #[test]
    fn test_group_member_not_duplicated() {
        let host = records(&["wheel:x:10:root,alice"]);
        let baseline = records(&["wheel:x:10:root"]);
        // The image already added alice on its own.
        let new = records(&["wheel:x:10:root,alice"]);
        let merged_passwd = vec![
            "root:x:0:0::/root:/bin/bash".to_string(),
            "alice:x:1001:1001::/home/alice:/bin/bash".to_string(),
        ];
        let merged = merge_group(&host, &baseline, &new, &merged_passwd).unwrap();
        assert_eq!(merged, vec!["wheel:x:10:root,alice".to_string()]);
    }

    #[test]
    fn test_gshadow_gated_by_group_gid() {
        let host_group = records(&["localgrp:x:1002:alice", "oldsvc:x:900:"]);
        let host = records(&["localgrp:!::alice", "oldsvc:!::"]);
        let baseline = records(&[]);
        let new = records(&["root:::"]);
        let merged_passwd = vec!["alice:x:1001:1001::/home/alice:/bin/bash".to_string()];
        let merged =
            merge_gshadow(&host, &baseline, &new, &host_group, &merged_passwd).unwrap();
        assert_eq!(
            merged,
            vec!["root:::".to_string(), "localgrp:!::alice".to_string()]
        );
    }

    #[test]
    fn test_gshadow_orphan_entry_is_malformed() {
        let host_group = records(&[]);
        let host = records(&["phantom:!::"]);
        let baseline = records(&[]);
        let new = records(&[]);
        assert!(matches!(
            merge_gshadow(&host, &baseline, &new, &host_group, &[]),
            Err(Error::MalformedDatabase("gshadow"))
        ));
    }

    // Merging is a pure function of its inputs; identical inputs yield
    // byte-identical output across runs.
    #[test]
    fn test_merge_deterministic() {
        let host = records(&[
            "zeta:x:1005:1005::/home/zeta:/bin/bash",
            "alpha:x:1004:1004::/home/alpha:/bin/bash",
            "root:x:0:0::/root:/bin/bash",
        ]);
        let baseline = records(&["root:x:0:0::/root:/bin/bash"]);
        let new = records(&[
            "root:x:0:0::/root:/bin/bash",
            "daemon:x:2:2::/:/usr/bin/nologin",
        ]);
        let a = merge_passwd(&host, &baseline, &new).unwrap();
        let b = merge_passwd(&host, &baseline, &new).unwrap();
        assert_eq!(a, b);
        // Survivors are emitted sorted by name.
        assert_eq!(
            a,
            vec![
                "daemon:x:2:2::/:/usr/bin/nologin".to_string(),
                "root:x:0:0::/root:/bin/bash".to_string(),
                "alpha:x:1004:1004::/home/alpha:/bin/bash".to_string(),
                "zeta:x:1005:1005::/home/zeta:/bin/bash".to_string(),
            ]
        );
    }

    // End-to-end over real files: the staged databases are written
    // newline-terminated, and a second identical run produces
    // byte-identical output.
    #[test]
    fn test_merge_identity_files() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8Path::from_path(td.path()).unwrap();
        let paths = SystemPaths::new(root);
        let rootfs = Rootfs::new(root.join("bundle/rootfs"));

        for dir in [
            paths.etc(),
            paths.usr_etc(),
            paths.new_etc(),
            rootfs.path().join("etc"),
        ] {
            std::fs::create_dir_all(dir)?;
        }

        let write = |dir: &Utf8Path, name: &str, content: &str| {
            std::fs::write(dir.join(name), content)
        };

        write(
            &paths.etc(),
            "passwd",
            indoc! {"
                root:x:0:0::/root:/bin/bash
                alice:x:1001:1001::/home/alice:/bin/bash
            "},
        )?;
        write(&paths.usr_etc(), "passwd", "root:x:0:0::/root:/bin/bash\n")?;
        write(
            &rootfs.path().join("etc"),
            "passwd",
            "root:x:0:0::/root:/bin/zsh\n",
        )?;

        write(
            &paths.etc(),
            "shadow",
            "root:!:19000::::::\nalice:$6$s$h:19100::::::\n",
        )?;
        write(&paths.usr_etc(), "shadow", "root:!:19000::::::\n")?;
        write(&rootfs.path().join("etc"), "shadow", "root:!:19500::::::\n")?;

        write(
            &paths.etc(),
            "group",
            "root:x:0:\nwheel:x:10:alice\nalice:x:1001:\n",
        )?;
        write(&paths.usr_etc(), "group", "root:x:0:\nwheel:x:10:\n")?;
        write(
            &rootfs.path().join("etc"),
            "group",
            "root:x:0:\nwheel:x:10:\n",
        )?;

        write(
            &paths.etc(),
            "gshadow",
            "root:::\nwheel:!::alice\nalice:!::\n",
        )?;
        write(&paths.usr_etc(), "gshadow", "root:::\nwheel:!::\n")?;
        write(&rootfs.path().join("etc"), "gshadow", "root:::\nwheel:!::\n")?;

        merge_identity(&paths, &rootfs)?;

        let staged = paths.new_etc();
        assert_eq!(
            std::fs::read_to_string(staged.join("passwd"))?,
            indoc! {"
                root:x:0:0::/root:/bin/zsh
                alice:x:1001:1001::/home/alice:/bin/bash
            "}
        );
        assert_eq!(
            std::fs::read_to_string(staged.join("shadow"))?,
            "root:!:19500::::::\nalice:$6$s$h:19100::::::\n"
        );
        assert_eq!(
            std::fs::read_to_string(staged.join("group"))?,
            "root:x:0:\nwheel:x:10:alice\nalice:x:1001:\n"
        );
        assert_eq!(
            std::fs::read_to_string(staged.join("gshadow"))?,
            "root:::\nwheel:!::alice\nalice:!::\n"
        );

        // Idempotence: nothing on the host changed, so a second run
        // rewrites the same bytes.
        let before: Vec<String> = ["passwd", "shadow", "group", "gshadow"]
            .iter()
            .map(|db| std::fs::read_to_string(staged.join(db)).unwrap())
            .collect();
        merge_identity(&paths, &rootfs)?;
        let after: Vec<String> = ["passwd", "shadow", "group", "gshadow"]
            .iter()
            .map(|db| std::fs::read_to_string(staged.join(db)).unwrap())
            .collect();
        assert_eq!(before, after);

        Ok(())
    }
}
