use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DaemonRunResult, DatasetResult, DetectResult, InitResult, ProgressResult, StagesResult,
    WhyResult,
};
use crate::daemon::ControlReport;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_init(result: &InitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stages(result: &StagesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_dataset(result: &DatasetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_detect(result: &DetectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_progress(result: &ProgressResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_why(result: &WhyResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_daemon(result: &ControlReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cycle(result: &DaemonRunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
