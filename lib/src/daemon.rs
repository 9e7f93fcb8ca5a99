//! Background update polling.

use std::time::Duration;

use anyhow::Result;

use crate::config::{SystemConfig, DEFAULT_UPDATE_INTERVAL_SECS};
use crate::image;
use crate::paths::SystemPaths;
use crate::task::Task;

/// Poll for updates on an interval, prompting the logged-in user via
/// desktop notifications and escalating through pkexec on consent.
///
/// Does not return under normal operation. Failures inside an
/// iteration are swallowed so a transient network outage doesn't kill
/// the poller.
pub(crate) fn update_check(paths: &SystemPaths) -> Result<()> {
    // The greeter session has no business prompting anyone.
    if std::env::var("USER").as_deref() == Ok("gdm-greeter") {
        return Ok(());
    }

    let config = SystemConfig::load(&paths.system_config())?;
    if config.auto_update == Some(false) {
        return Ok(());
    }
    let interval = config
        .auto_update_interval
        .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);

    loop {
        if let Err(e) = check_once(paths) {
            tracing::debug!("update check failed: {e:#}");
        }
        std::thread::sleep(Duration::from_secs(interval));
    }
}

fn check_once(paths: &SystemPaths) -> Result<()> {
    if paths.update_rootfs().is_dir() {
        // A staged update is waiting for a reboot already.
        return Ok(());
    }
    let config = SystemConfig::load(&paths.system_config())?;
    let image_ref = config.require_image()?;
    if image::is_already_latest(image_ref, paths)? {
        return Ok(());
    }

    let choice = notify_prompt(
        "Update available",
        "A system update is available",
        &[("update", "Update in the background")],
    )?;
    if choice.is_empty() {
        return Ok(());
    }

    let st = Task::new("Updating", "pkexec")
        .quiet()
        .args(["system", "update"])
        .status()?;
    if !st.success() {
        return Ok(());
    }

    let choice = notify_prompt(
        "System updated",
        "Reboot to apply update?",
        &[("reboot", "Reboot now"), ("later", "Later")],
    )?;
    if choice == "reboot" {
        Task::new("Rebooting system", "reboot").run()?;
    }
    Ok(())
}

/// Raise a desktop notification offering `actions` as (key, label)
/// pairs; returns the selected key, or an empty string when the
/// notification was dismissed.
fn notify_prompt(title: &str, body: &str, actions: &[(&str, &str)]) -> Result<String> {
    let mut args = vec![
        "--app-name=System".to_string(),
        "--urgency=critical".to_string(),
        title.to_string(),
        body.to_string(),
    ];
    args.extend(
        actions
            .iter()
            .map(|(key, label)| format!("--action={key}={label}")),
    );
    let out = Task::new(format!("Notifying: {title}"), "notify-send")
        .quiet()
        .args(args)
        .read()?;
    Ok(out.trim().to_string())
}
