//! Command Line Interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use of_core::constants::calibration;
use of_core::CalibrationRequest;

#[derive(Parser)]
#[command(name = "openfand")]
#[command(version)]
#[command(about = "openfand - OpenFAN fan controller daemon")]
#[command(long_about = "openfand - OpenFAN fan controller daemon

Polls an OpenFAN or OpenFAN Micro board over HTTP, drives fan PWM from
averaged temperatures and flags stalled fans.

EXAMPLES:
    openfand run                          Run the control daemon
    openfand status                       Poll once and show fan status
    openfand set-pwm --fan 0 --percent 40
    openfand led off
    openfand voltage --volts 12 --confirm
    openfand calibrate --fan 0 --to 50
    openfand apply-profile --fan 1 quiet
    openfand diagnostics                  Dump state as JSON

ENVIRONMENT VARIABLES:
    OPENFAN_LOG=debug      Log level (trace, debug, info, warn, error)
    OPENFAN_CONFIG=PATH    Config file path

FILES:
    ~/.config/openfan/config.json         Device, temperature sources and options
    ~/.config/openfan/config.pid          Pid of the running daemon

A running daemon picks up profile and calibration changes written to the
config file by other openfand commands. Calibration refuses to start while
the daemon runs.")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to $OPENFAN_CONFIG or ~/.config/openfan/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control daemon in the foreground
    Run,

    /// Poll the device once and print fan status
    Status,

    /// Set one fan's PWM percentage
    SetPwm {
        #[arg(long)]
        fan: u8,
        /// 0-100; non-zero values are raised to the fan's minimum
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// Switch the activity LED
    Led {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Switch the fan supply voltage
    Voltage {
        /// 5 or 12
        #[arg(long)]
        volts: u8,
        /// Required: this changes the physical supply to the fans
        #[arg(long)]
        confirm: bool,
    },

    /// Find and store a fan's minimum spinning PWM
    Calibrate(CalibrateArgs),

    /// List built-in and saved profiles
    Profiles,

    /// Select a profile for a fan
    ApplyProfile {
        #[arg(long)]
        fan: u8,
        profile: String,
    },

    /// Save a fan's current curve and timing as a named profile
    SaveProfile {
        #[arg(long)]
        fan: u8,
        profile: String,
    },

    /// Poll once and dump full device state as JSON
    Diagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

#[derive(Args)]
pub struct CalibrateArgs {
    #[arg(long)]
    pub fan: u8,
    #[arg(long, default_value_t = calibration::FROM_PCT)]
    pub from: u8,
    #[arg(long, default_value_t = calibration::TO_PCT)]
    pub to: u8,
    #[arg(long, default_value_t = calibration::STEP)]
    pub step: u8,
    #[arg(long, default_value_t = calibration::RPM_THRESHOLD)]
    pub rpm_threshold: u32,
    #[arg(long, default_value_t = calibration::MARGIN)]
    pub margin: u8,
}

impl CalibrateArgs {
    pub fn request(&self) -> CalibrationRequest {
        CalibrationRequest {
            from_pct: self.from,
            to_pct: self.to,
            step: self.step,
            rpm_threshold: self.rpm_threshold,
            margin: self.margin,
        }
    }
}
