pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod render;
pub mod task;
pub mod timeline;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting kairos CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.kairosrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre
      .rc_overrides
      .into_iter()
      .chain(cli.rc_overrides)
  );

  let source =
    config::resolve_task_source(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve task \
       source"
    )?;
  let zone = datetime::ViewerZone::resolve(
    cfg.get("timezone").as_deref()
  );
  info!(%zone, ?source, "resolved viewer");

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let session = commands::Session {
    source: &source,
    cfg: &cfg,
    renderer: &renderer,
    zone,
    output: if cli.json {
      commands::Output::Json
    } else {
      commands::Output::Table
    }
  };
  commands::dispatch(&session, inv)?;

  info!("done");
  Ok(())
}
