use std::path::{Path, PathBuf};

use clap::Parser;
use pretty_assertions::assert_eq;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl summit::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

/// Fresh scratch directory holding an empty config file.
fn scratch_dir(name: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("summit-cli-{}-{name}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("config.json"), "{}")?;
    Ok(dir)
}

fn config_arg(dir: &Path) -> String {
    dir.join("config.json").display().to_string()
}

async fn run_with_client(
    argv: &[&str],
    client: summit::FakeHardwareClient,
) -> anyhow::Result<String> {
    let args = summit::Args::try_parse_from(argv)?;
    let options = args.run_options();
    let mut output = Vec::new();
    summit::run_with_clients(
        args.into_command(),
        &mut output,
        &FakeTerminalClient,
        Box::new(client),
        options,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv(argv: &[&str]) -> anyhow::Result<String> {
    let args = summit::Args::try_parse_from(argv)?;
    let hardware_client = args.hardware_client();
    let options = args.run_options();
    let mut output = Vec::new();
    summit::run_with_clients(
        args.into_command(),
        &mut output,
        &FakeTerminalClient,
        hardware_client,
        options,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

#[tokio::test]
async fn ports_lists_the_fake_ports() -> anyhow::Result<()> {
    let dir = scratch_dir("ports")?;
    let config = config_arg(&dir);

    let stdout = run_with_argv(&[
        "summit", "--config", &config, "--fake", "--output", "pretty", "ports",
    ])
    .await?;

    assert_eq!("fake0\nfake1\nfake-modem\n", stdout);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn devices_reports_master_and_pruned_slaves_as_json() -> anyhow::Result<()> {
    let dir = scratch_dir("devices")?;
    let config = config_arg(&dir);

    let stdout = run_with_argv(&[
        "summit",
        "--config",
        &config,
        "--fake",
        "--fake-slaves",
        "3",
        "--output",
        "json",
        "devices",
    ])
    .await?;

    let report: serde_json::Value = serde_json::from_str(stdout.trim_end())?;
    assert_eq!("02:EA:00:00:00:F0", report["master"]["mac"]);
    assert_eq!(3, report["slaves"].as_array().map_or(0, Vec::len));
    assert_eq!(
        "02:EA:00:00:00:03",
        report["slaves"][2]["identity"]["module"]["mac"]
    );
    assert_eq!(true, report["topology_match"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn devices_flags_topology_mismatches() -> anyhow::Result<()> {
    let dir = scratch_dir("topology")?;
    std::fs::write(
        dir.join("config.json"),
        r#"{"topology": {"slave_macs": ["02:EA:00:00:00:01", "02:EA:00:00:00:09"]}}"#,
    )?;
    let config = config_arg(&dir);

    let stdout = run_with_argv(&[
        "summit", "--config", &config, "--fake", "--output", "json", "devices",
    ])
    .await?;

    let report: serde_json::Value = serde_json::from_str(stdout.trim_end())?;
    assert_eq!(false, report["topology_match"]);
    assert_eq!(serde_json::json!(["02:EA:00:00:00:09"]), report["missing"]);
    assert_eq!(serde_json::json!(["02:EA:00:00:00:02"]), report["unexpected"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rd_reads_the_identity_register_of_a_slave() -> anyhow::Result<()> {
    let dir = scratch_dir("rd")?;
    let config = config_arg(&dir);

    let stdout = run_with_argv(&[
        "summit",
        "--config",
        &config,
        "--fake",
        "--output",
        "pretty",
        "rd",
        "0x403024",
        "--target",
        "02:EA:00:00:00:02",
    ])
    .await?;

    assert_eq!("0xEA02\n", stdout);
    Ok(())
}

#[tokio::test]
async fn wr_updates_the_master_register() -> anyhow::Result<()> {
    let dir = scratch_dir("wr")?;
    let config = config_arg(&dir);
    let client = summit::FakeHardwareClient::new(1);
    let master = client.master().clone();

    let stdout = run_with_client(
        &[
            "summit", "--config", &config, "--output", "json", "wr", "0x400100", "0x1234",
        ],
        client,
    )
    .await?;

    assert_eq!("{\"address\":4194560,\"value\":4660}\n", stdout);
    assert_eq!(Some(0x1234), master.register(0x0040_0100));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_slave_target_is_an_error() -> anyhow::Result<()> {
    let dir = scratch_dir("unknown-target")?;
    let config = config_arg(&dir);

    let error = run_with_argv(&[
        "summit", "--config", &config, "--fake", "rd", "0x10", "--target", "7",
    ])
    .await
    .expect_err("an index past the directory should fail");

    assert!(matches!(
        error.downcast_ref::<summit::CliConfigError>(),
        Some(summit::CliConfigError::NoSuchDevice { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn status_describes_link_faults() -> anyhow::Result<()> {
    let dir = scratch_dir("status")?;
    let config = config_arg(&dir);

    let stdout = run_with_argv(&[
        "summit", "--config", &config, "--output", "json", "status", "0x01",
    ])
    .await?;

    assert_eq!(
        "{\"code\":1,\"class\":\"master\",\"description\":\"Success\"}\n",
        stdout
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fw_load_switches_the_master_to_the_new_image() -> anyhow::Result<()> {
    let dir = scratch_dir("fw-load")?;
    let config = config_arg(&dir);
    let image_path = dir.join("master.bin");
    let image: Vec<u8> = (0..300u32).map(|value| (value % 251) as u8).collect();
    std::fs::write(&image_path, &image)?;
    let client = summit::FakeHardwareClient::new(1);
    let master = client.master().clone();
    let image_arg = image_path.display().to_string();

    let stdout = run_with_client(
        &[
            "summit", "--config", &config, "--output", "json", "fw-load", &image_arg,
        ],
        client,
    )
    .await?;

    let report: serde_json::Value = serde_json::from_str(stdout.trim_end())?;
    assert_eq!(1, report["target_slot"]);
    assert_eq!(300, report["bytes_loaded"]);
    assert_eq!(1, master.active_slot());
    assert_eq!(image, master.slot_image(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fw_load_reports_a_failed_verify() -> anyhow::Result<()> {
    let dir = scratch_dir("fw-load-verify")?;
    let config = config_arg(&dir);
    let image_path = dir.join("master.bin");
    std::fs::write(&image_path, vec![0x5A; 64])?;
    let client = summit::FakeHardwareClient::new(1);
    let master = client.master().clone();
    master.set_fail_verify(true);
    let image_arg = image_path.display().to_string();

    let error = run_with_client(
        &["summit", "--config", &config, "fw-load", &image_arg],
        client,
    )
    .await
    .expect_err("a failed verify should fail the command");

    assert!(error.to_string().starts_with("fw-load (verify)"));
    assert_eq!(0, master.active_slot());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dump_then_mfg_load_round_trips_through_a_slave() -> anyhow::Result<()> {
    let dir = scratch_dir("mfg")?;
    let config = config_arg(&dir);
    let dir_arg = dir.display().to_string();
    let mac = summit::fake_slave_mac(1);
    let mut section = vec![0u8; summit::FlashSection::Manufacturing.size()];
    section[50..56].copy_from_slice(&mac.octets());
    let mfg_path = dir.join("input_mfg.txt");
    summit::MfgFile::from_section(section.clone())?.save(&mfg_path)?;
    let mfg_arg = mfg_path.display().to_string();
    let client = summit::FakeHardwareClient::new(2);
    let slave = client.slaves()[0].clone();

    run_with_client(
        &[
            "summit", "--config", &config, "mfg-load", &mfg_arg, "--target", "0",
        ],
        client.clone(),
    )
    .await?;
    assert_eq!(section, slave.flash(0x000C_0000, section.len()));

    run_with_client(
        &[
            "summit", "--config", &config, "dump", "mfg", "--prefix", "bench", "--dir",
            &dir_arg, "--target", "0",
        ],
        client,
    )
    .await?;
    let dumped = summit::MfgFile::load(&dir.join("bench_02-EA-00-00-00-01_mfg.txt"))?;
    assert_eq!(mac, dumped.mac());
    assert_eq!(section, dumped.into_section());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mfg_load_refuses_another_devices_file() -> anyhow::Result<()> {
    let dir = scratch_dir("mfg-mismatch")?;
    let config = config_arg(&dir);
    let mut section = vec![0u8; summit::FlashSection::Manufacturing.size()];
    section[50..56].copy_from_slice(&summit::fake_slave_mac(2).octets());
    let mfg_path = dir.join("other_mfg.txt");
    summit::MfgFile::from_section(section)?.save(&mfg_path)?;
    let mfg_arg = mfg_path.display().to_string();
    let client = summit::FakeHardwareClient::new(2);
    let slave = client.slaves()[0].clone();

    let error = run_with_client(
        &[
            "summit", "--config", &config, "mfg-load", &mfg_arg, "--target", "0",
        ],
        client,
    )
    .await
    .expect_err("a file for another MAC should be refused");

    assert!(matches!(
        error.downcast_ref::<summit::MfgFileError>(),
        Some(summit::MfgFileError::MacMismatch { .. })
    ));
    assert_eq!(vec![0xFF; 6], slave.flash(0x000C_0000 + 50, 6));
    Ok(())
}
