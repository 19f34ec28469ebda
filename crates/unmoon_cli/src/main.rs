use std::path::Path;

use clap::{CommandFactory, Parser};
use log::LevelFilter;
use unmoon_lib::ast::Block;
use unmoon_lib::{Catalog, ConstantReplacer};

use crate::cli::{Cli, RewriteArgs, TopLevel};

mod cli;

fn fail(msg: String) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    match verbose {
        0 if std::env::var_os("RUST_LOG").is_some() => {}
        0 => {
            builder.filter_level(LevelFilter::Warn);
        }
        1 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.format_timestamp(None).init();
}

fn read_text(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| fail(format!("failed to read {path:?}: {e}")))
}

fn load_block(path: &Path) -> Block {
    serde_json::from_str(&read_text(path))
        .unwrap_or_else(|e| fail(format!("invalid AST in {path:?}: {e}")))
}

fn load_constants(args: &RewriteArgs) -> Option<ConstantReplacer> {
    let path = args.constants.as_deref()?;
    let replacer = ConstantReplacer::from_json(&read_text(path))
        .unwrap_or_else(|e| fail(format!("invalid constant mapping {path:?}: {e}")));
    log::debug!("loaded {} constant mapping(s) from {path:?}", replacer.len());
    Some(replacer)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(TopLevel::Disasm { path, luac, rewrite }) => {
            let constants = load_constants(&rewrite);
            let (root, report) =
                match unmoon_lib::recover_chunk(&read_text(&path), &rewrite.options(), constants.as_ref()) {
                    Ok(v) => v,
                    Err(e) => fail(format!("recovery error: {e}")),
                };
            if !report.is_complete() {
                log::warn!(
                    "{} instruction(s) left unresolved, opcodes {:?}",
                    report.unresolved,
                    report.unknown_opcodes
                );
            }
            print!("{}", unmoon_lib::disassemble(&root));

            if let Some(out) = luac {
                let bytes = match unmoon_lib::write_chunk(&root) {
                    Ok(b) => b,
                    Err(e) => fail(format!("luac error: {e}")),
                };
                if let Err(e) = std::fs::write(&out, bytes) {
                    fail(format!("failed to write {out:?}: {e}"));
                }
            }
        }
        Some(TopLevel::Simplify { path, json, rewrite }) => {
            let mut block = load_block(&path);
            let report = unmoon_lib::simplify(&mut block, &rewrite.options(), load_constants(&rewrite));
            log::info!(
                "{} replacement(s) in {} iteration(s), converged: {}",
                report.replacements,
                report.iterations,
                report.converged
            );
            if json {
                match serde_json::to_string_pretty(&block) {
                    Ok(s) => println!("{s}"),
                    Err(e) => fail(format!("failed to serialize AST: {e}")),
                }
            } else {
                print!("{block}");
            }
        }
        Some(TopLevel::Fingerprint { path, rewrite }) => {
            let mut block = load_block(&path);
            unmoon_lib::simplify(&mut block, &rewrite.options(), load_constants(&rewrite));
            let fp = unmoon_lib::fingerprint(&block);
            match Catalog::global().lookup(&fp) {
                Some(shape) => println!("{fp}\t{}\t{:?}", shape.op, shape.rule),
                None => println!("{fp}\t?"),
            }
        }
        Some(TopLevel::Catalog) => {
            let catalog = Catalog::global();
            for shape in catalog.entries() {
                println!("{:<10}\t{:<40}\t{:?}", shape.op, shape.fingerprint, shape.rule);
            }
            log::info!("{} shape(s)", catalog.len());
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                fail(format!("failed to print help: {e}"));
            }
        }
    }
}
