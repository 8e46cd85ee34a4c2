use podbk::{cli::PodBkArgs, config::Config};
use yansi::{Color, Paint};

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

fn main() {
    let args: PodBkArgs = argh::from_env();

    let conf = match Config::load(args.cmd.config_path()) {
        Ok(conf) => conf,
        Err(e) => {
            init_logging(false);
            log::error!("{} {e}", "Error:".paint(Color::Red));
            std::process::exit(1);
        }
    };
    init_logging(conf.debug);

    std::process::exit(args.run(conf));
}
