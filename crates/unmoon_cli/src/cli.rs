use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_version};
use clap_complete::Shell;
use unmoon_lib::RewriteOptions;

#[derive(Parser)]
#[command(name = "unmoon",
    bin_name = "unmoon",
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Args, Debug, Clone)]
pub struct RewriteArgs {
    /// JSON mapping of indirection keys to name paths, e.g. {"FOO": ["bit32", "band"]}
    #[arg(long)]
    pub constants: Option<PathBuf>,

    /// Prefix of decompiler-generated temporaries
    #[arg(long, default_value = "_")]
    pub temp_prefix: String,

    /// Name of the VM's register store helper
    #[arg(long, default_value = "stk")]
    pub register_helper: String,

    /// Upper bound on full rewrite pipeline iterations
    #[arg(long, default_value_t = 64)]
    pub max_iterations: usize,
}

impl RewriteArgs {
    pub fn options(&self) -> RewriteOptions {
        RewriteOptions {
            temp_prefix: self.temp_prefix.clone(),
            register_helper: self.register_helper.clone(),
            max_iterations: self.max_iterations,
        }
    }
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Recovers opcodes of a JSON chunk and prints the disassembly
    Disasm {
        /// Path to the chunk JSON (handlers + root function)
        path: PathBuf,

        /// Also write the recovered prototype tree as a Lua 5.1 chunk
        #[arg(long)]
        luac: Option<PathBuf>,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },
    /// Runs the rewrite pipeline over a parsed AST and prints the result
    Simplify {
        /// Path to the AST JSON (a block)
        path: PathBuf,

        /// Print the rewritten tree as JSON instead of Lua-like source
        #[arg(long, default_value_t = false)]
        json: bool,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },
    /// Simplifies a handler AST and prints its fingerprint and catalog match
    Fingerprint {
        /// Path to the handler AST JSON (a block)
        path: PathBuf,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },
    /// Lists the handler-shape catalog
    Catalog,
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
