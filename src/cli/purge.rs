use argh::FromArgs;
use yansi::{Color, Paint};

use crate::{backup::purge_batch, config::Config};

#[derive(FromArgs, PartialEq, Debug, Default)]
/// Remove backups older than the retention period
#[argh(subcommand, name = "purge")]
pub struct PurgeCommand {
    #[argh(option, short = 'c')]
    /// config file
    pub config: Option<String>,

    #[argh(switch, short = 'n')]
    /// only list what would be removed
    pub dry_run: bool,
}

impl PurgeCommand {
    pub fn run(&self, conf: Config) -> i32 {
        let Some(pods) = super::list_workloads(&conf) else {
            return 1;
        };

        let dry_run = self.dry_run || conf.dry_run;
        let report = match purge_batch(&pods, &conf, chrono::Local::now().naive_local(), dry_run) {
            Ok(report) => report,
            Err(e) => {
                log::error!("{} {e}", "Error:".paint(Color::Red));
                return 1;
            }
        };

        let verb = if dry_run { "Would remove" } else { "Removed" };
        for path in &report.removed {
            println!("--> {verb} {}", path.display().paint(Color::Yellow));
        }
        for (path, reason) in &report.skipped {
            println!("--> Skipped {}: {reason}", path.display().paint(Color::Red));
        }
        println!(
            "{} removed, {} skipped, {} kept",
            report.removed.len(),
            report.skipped.len(),
            report.kept
        );

        if report.has_errors() { 1 } else { 0 }
    }
}
