use std::process::Command;

use eyre::Context as _;

fn paytoll(cfg_dir: &tempfile::TempDir, data_dir: &tempfile::TempDir) -> Command {
    let exe = assert_cmd::cargo::cargo_bin!("paytoll-mcp");
    let mut cmd = Command::new(exe);
    cmd.env("PAYTOLL_CONFIG_DIR", cfg_dir.path())
        .env("PAYTOLL_DATA_DIR", data_dir.path())
        .env_remove("PRIVATE_KEY")
        .env_remove("PAYTOLL_API_URL")
        .env_remove("PAYTOLL_SECRET_COMMAND")
        .current_dir(data_dir.path());
    cmd
}

#[test]
fn paths_prints_valid_json() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = paytoll(&cfg_dir, &data_dir)
        .arg("paths")
        .output()
        .context("run paytoll-mcp paths")?;

    assert!(
        out.status.success(),
        "paths exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    let config_file = v
        .get("config_file")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    assert!(config_file.ends_with("config.toml"), "{config_file}");
    assert!(v.get("log_file").and_then(|x| x.as_str()).is_some());
    Ok(())
}

#[test]
fn unreachable_api_is_fatal_at_startup() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = paytoll(&cfg_dir, &data_dir)
        .args(["--api-url", "http://127.0.0.1:9", "tools"])
        .output()
        .context("run paytoll-mcp tools")?;

    assert!(!out.status.success(), "expected startup failure");
    assert!(out.stdout.is_empty(), "nothing should reach stdout");
    Ok(())
}

#[test]
fn require_wallet_without_secret_is_fatal() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = paytoll(&cfg_dir, &data_dir)
        .args(["--require-wallet", "--api-url", "http://127.0.0.1:9", "tools"])
        .output()
        .context("run paytoll-mcp tools --require-wallet")?;

    assert!(!out.status.success(), "expected startup failure");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("wallet is required"), "{stderr}");
    Ok(())
}

#[test]
fn bad_config_file_is_reported() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    std::fs::write(cfg_dir.path().join("config.toml"), "api_url = [")?;

    let out = paytoll(&cfg_dir, &data_dir)
        .arg("tools")
        .output()
        .context("run paytoll-mcp tools with bad config")?;

    assert!(!out.status.success(), "expected config failure");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("parse config.toml"), "{stderr}");
    Ok(())
}

#[test]
fn dotenv_can_relocate_config_dir() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let dotenv_cfg = tempfile::tempdir()?;
    std::fs::write(
        data_dir.path().join(".env"),
        format!("PAYTOLL_CONFIG_DIR=\"{}\"\n", dotenv_cfg.path().display()),
    )?;

    let out = paytoll(&cfg_dir, &data_dir)
        .env_remove("PAYTOLL_CONFIG_DIR")
        .arg("paths")
        .output()
        .context("run paytoll-mcp paths with .env")?;

    assert!(
        out.status.success(),
        "paths exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    assert_eq!(
        v.get("config_dir").and_then(serde_json::Value::as_str),
        dotenv_cfg.path().to_str()
    );
    Ok(())
}
