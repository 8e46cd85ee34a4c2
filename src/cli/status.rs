use std::time::SystemTime;

use argh::FromArgs;
use yansi::{Color, Paint};

use crate::{backup::status_batch, config::Config};

#[derive(FromArgs, PartialEq, Debug, Default)]
/// Report deployment groups without a recent successful backup
#[argh(subcommand, name = "status")]
pub struct StatusCommand {
    #[argh(option, short = 'c')]
    /// config file
    pub config: Option<String>,
}

impl StatusCommand {
    pub fn run(&self, conf: Config) -> i32 {
        let Some(pods) = super::list_workloads(&conf) else {
            return 1;
        };

        let report = status_batch(&pods, &conf, SystemTime::now());
        let color = if report.all_good() {
            Color::Green
        } else {
            Color::Red
        };
        for line in report.lines() {
            println!("{}", line.paint(color));
        }

        if report.all_good() { 0 } else { 1 }
    }
}
