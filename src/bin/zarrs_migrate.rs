use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use zarrs_migrate::{
    backend::{open_container, ContainerAccess},
    migrate::MigrationEngine,
    progress::{ProgressCallback, ProgressStats},
    MigrateArguments,
};

fn bar_style_run() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}/{duration_precise}] {bar:40.black/bold} {pos}/{len} ({percent}%) {prefix} {msg}",
    )
    .unwrap_or(ProgressStyle::default_bar())
}

fn run(arguments: &MigrateArguments) -> anyhow::Result<bool> {
    let options = arguments.migration_options()?;

    let source = open_container(&arguments.input_container, ContainerAccess::Read)
        .with_context(|| format!("Failed to open {}", arguments.input_container))?;
    let destination = open_container(&arguments.output_container, ContainerAccess::Write)
        .with_context(|| format!("Failed to create {}", arguments.output_container))?;

    let bar = ProgressBar::new(0);
    bar.set_style(bar_style_run());
    let progress_callback = |stats: ProgressStats| {
        if bar.prefix() != stats.path {
            bar.set_prefix(stats.path.clone());
        }
        bar.set_length(stats.num_steps as u64);
        bar.set_position(stats.step as u64);
        bar.set_message(format!(
            "rw:{:.2}/{:.2}",
            stats.read.as_secs_f32(),
            stats.write.as_secs_f32(),
        ));
    };
    let progress_callback = ProgressCallback::new(&progress_callback);

    let report = MigrationEngine::new(&source, &destination, &options)?
        .with_progress_callback(&progress_callback)
        .run()?;
    bar.finish_and_clear();

    println!("{report}");
    Ok(!report.has_subtree_failures())
}

fn main() -> ExitCode {
    let arguments = MigrateArguments::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if arguments.verbose {
        match serde_json::to_string_pretty(&arguments) {
            Ok(json) => println!("{} {json}", zarrs_migrate::version_with_zarrs()),
            Err(err) => log::warn!("Failed to serialise arguments: {err}"),
        }
    }

    match run(&arguments) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
