use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sjs")]
#[command(about = "Render templates with embedded scripts")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Render a template file.
    Render(RenderArgs),
    /// Run a script file and print its last value.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RenderArgs {
    pub(crate) template: String,
    /// JSON file with the Global data.
    #[arg(long = "data")]
    pub(crate) data: Option<String>,
    /// JSON file with the Local data of the top-level template.
    #[arg(long = "local")]
    pub(crate) local: Option<String>,
    #[arg(long = "out")]
    pub(crate) out: Option<String>,
    #[arg(long = "search-dir")]
    pub(crate) search_dirs: Vec<String>,
    /// Script file, or directory of `.rhai` files, run before rendering.
    #[arg(long = "script")]
    pub(crate) scripts: Vec<String>,
    #[arg(long = "seed")]
    pub(crate) seed: Option<u32>,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
    /// Fail on undefined template values.
    #[arg(long = "strict")]
    pub(crate) strict: bool,
    /// Log the spliced body when a template fails to compile.
    #[arg(long = "debug")]
    pub(crate) debug: bool,
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    pub(crate) script: String,
    #[arg(long = "data")]
    pub(crate) data: Option<String>,
    #[arg(long = "search-dir")]
    pub(crate) search_dirs: Vec<String>,
}
