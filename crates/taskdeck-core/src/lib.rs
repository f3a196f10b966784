pub mod backend;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod datetime;
pub mod error;
pub mod navigation;
pub mod preferences;
pub mod render;
pub mod repl;
pub mod reset;
pub mod routes;
pub mod session;
pub mod shell;
pub mod tasks;
pub mod theme;
pub mod transport;
pub mod validate;

use std::ffi::OsString;
use std::io::{
  self,
  IsTerminal,
  Write
};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::backend::ReqwestBackend;
use crate::navigation::BrowserHistory;
use crate::preferences::{
  FilePreferenceStore,
  PreferenceStore
};
use crate::session::SessionManager;
use crate::shell::{
  Flow,
  Shell
};
use crate::tasks::TaskController;
use crate::theme::ThemeController;
use crate::transport::{
  ApiClient,
  UnauthorizedPolicy
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    exec = cli.exec.len(),
    "starting taskdeck"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(cli.overrides());
  debug!(files = ?cfg.loaded_files, "configuration resolved");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;

  let mut shell =
    build_shell(&runtime, &cfg, &data_dir)?;
  let mut stdout = io::stdout();
  runtime
    .block_on(shell.start(&mut stdout))?;

  if cli.exec.is_empty() {
    repl::run_interactive(
      &runtime, &mut shell
    )?;
  } else {
    for command in &cli.exec {
      let flow = runtime.block_on(
        shell.execute(command, &mut stdout)
      )?;
      if flow == Flow::Quit {
        break;
      }
    }
    stdout.flush()?;
  }

  info!("done");
  Ok(())
}

/// Wires the controllers together. Theme is resolved and applied before
/// anything is printed, and the session is restored before the shell
/// routes anywhere.
fn build_shell(
  runtime: &tokio::runtime::Runtime,
  cfg: &config::Config,
  data_dir: &Path
) -> anyhow::Result<Shell> {
  let preferences: Arc<
    dyn PreferenceStore
  > = Arc::new(
    FilePreferenceStore::open(data_dir)
      .with_context(|| {
        format!(
          "failed to open preferences \
           in {}",
          data_dir.display()
        )
      })?
  );

  let renderer = render::Renderer::new(
    cfg,
    io::stdout().is_terminal()
  )?;
  let theme = ThemeController::load(
    preferences.clone(),
    render::terminal_prefers_dark()
  );
  theme.apply(renderer.palette());

  let history =
    Arc::new(BrowserHistory::new("/"));
  let backend = Arc::new(
    ReqwestBackend::new(
      &cfg.api_url(),
      cfg.timeout()?
    )?
  );
  let client = Arc::new(ApiClient::new(
    backend,
    UnauthorizedPolicy::new(
      history.clone()
    )
  ));

  let session =
    Arc::new(SessionManager::new(
      client.clone(),
      history.clone(),
      preferences
    ));
  let tasks = Arc::new(
    TaskController::new(client)
  );

  let phase =
    runtime.block_on(session.restore());
  debug!(?phase, "startup session state");

  Ok(Shell::new(
    session, tasks, theme, history,
    renderer
  ))
}
