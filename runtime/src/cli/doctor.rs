//! Environment readiness check.

use super::profiles_cmd;
use crate::driver::chromium::find_chromium;
use crate::session::{resolve_auth_state_path, StorageState};
use anyhow::Result;
use std::path::Path;
use std::process::Command;

/// Check Chromium, the saved session, the profiles and available memory.
pub async fn run(auth_state: Option<&str>, profile_file: Option<&Path>) -> Result<()> {
    println!("Harvest Doctor");
    println!("==============");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let chromium = find_chromium();
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Set HARVEST_CHROMIUM_PATH or install Chrome."),
    }

    let state_path = resolve_auth_state_path(auth_state);
    let session_ok = match StorageState::load(&state_path) {
        Ok(state) => {
            println!(
                "[OK] Session state: {} ({} cookies)",
                state_path.display(),
                state.cookies.len()
            );
            true
        }
        Err(e) => {
            println!("[!!] {e}");
            false
        }
    };

    let profiles_ok = match profiles_cmd::load(profile_file) {
        Ok(profiles) => {
            let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
            println!("[OK] Profiles: {}", names.join(", "));
            true
        }
        Err(e) => {
            println!("[!!] Profiles: {e:#}");
            false
        }
    };

    match available_memory_mb() {
        Some(mb) if mb >= 512 => println!("[OK] Available memory: {mb}MB (>= 512MB required)"),
        Some(mb) => println!("[!!] Available memory: {mb}MB (< 512MB, Chromium may struggle)"),
        None => println!("[??] Could not determine available memory"),
    }

    println!();
    if chromium.is_some() && session_ok && profiles_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}

/// Available memory in MB (platform-specific).
fn available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        let bytes: u64 = s.trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let output = Command::new("free").args(["-m"]).output().ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        s.lines()
            .find(|line| line.starts_with("Mem:"))
            .and_then(|line| line.split_whitespace().nth(6))
            .and_then(|v| v.parse().ok())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
