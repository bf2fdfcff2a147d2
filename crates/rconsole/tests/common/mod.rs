#![allow(dead_code)]
#![allow(unused_imports)]

pub mod harness;

pub use harness::{
    client_config, unused_port, wait_until, CollectingTelemetry, GatedConsole, TestRemote,
};

use assert_cmd::Command;

pub fn rconsole_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rconsole"));
    cmd.env("NO_COLOR", "1").env_remove("RCONSOLE_LOG");
    cmd
}
