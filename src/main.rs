//! mau-model: functional model of a match-action pipeline

use std::env;

use anyhow::{bail, Context};
use mau_model::config::Config;
use mau_model::device::{format_address, Chip};
use mau_model::parser::{ConfigImage, ImageCommand, PhvFile};

const USAGE: &str = "Usage: mau-model <image> [--phv file.toml] [--stage N] [--dump-regs] [--commands]";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut image_path = None;
    let mut phv_path = None;
    let mut stage = None;
    let mut dump_regs = false;
    let mut list_commands = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--phv" => {
                phv_path = Some(iter.next().context("--phv needs a file")?.as_str());
            }
            "--stage" => {
                let n = iter.next().context("--stage needs a number")?;
                stage = Some(n.parse::<usize>().with_context(|| format!("bad stage '{}'", n))?);
            }
            "--dump-regs" => dump_regs = true,
            "--commands" => list_commands = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown option '{}'\n{}", other, USAGE),
            other => image_path = Some(other),
        }
    }

    let Some(image_path) = image_path else {
        bail!("{}", USAGE);
    };

    println!("Loading: {}", image_path);
    println!();

    let data = std::fs::read(image_path).with_context(|| format!("Failed to read {}", image_path))?;
    let image = ConfigImage::parse(&data)?;
    image.print_summary();

    if list_commands {
        println!();
        println!("Commands:");
        for (idx, cmd) in image.commands().enumerate() {
            print_command(idx, &cmd);
        }
    }

    let mut chip = Chip::from_config(Config::get());
    chip.apply_image(&image)?;
    println!();
    chip.print_summary();

    if dump_regs {
        println!();
        println!("Registers:");
        chip.dump_registers();
    }

    let Some(phv_path) = phv_path else {
        return Ok(());
    };
    let input = PhvFile::from_file(phv_path)?.to_phv()?;

    let output = match stage {
        Some(s) => {
            let out = chip.evaluate(s, &input)?;
            println!();
            println!("Stage {}: {} tables ran, next table 0x{:02X}", s, out.tables.len(), out.next_table);
            for t in &out.tables {
                println!(
                    "  table {:2}: {} instr {} adata {} next 0x{:02X}",
                    t.table, t.action.source, t.action.instr_addr, t.action.adata_addr, t.action.next_table
                );
            }
            out.phv
        }
        None => {
            let out = chip.process(&input);
            println!();
            println!("Pipeline: stages run {:?}, next table 0x{:02X}", out.stages_run, out.next_table);
            out.phv
        }
    };

    println!();
    println!("Changed containers:");
    let changed = output.diff(&input);
    if changed.is_empty() {
        println!("  (none)");
    }
    for idx in changed {
        if output.is_valid(idx) {
            println!("  [{:3}] 0x{:X} -> 0x{:X}", idx, input.get(idx), output.get(idx));
        } else {
            println!("  [{:3}] 0x{:X} -> invalid", idx, input.get(idx));
        }
    }

    Ok(())
}

fn print_command(idx: usize, cmd: &ImageCommand) {
    match cmd {
        ImageCommand::Write { address, value } => {
            println!("  [{:3}] WRITE      {} = 0x{:X}", idx, format_address(*address), value);
        }
        ImageCommand::MaskWrite { address, mask, value } => {
            println!(
                "  [{:3}] MASKWRITE  {} mask=0x{:X} val=0x{:X}",
                idx,
                format_address(*address),
                mask,
                value
            );
        }
        ImageCommand::TableWrite { address, word0, word1 } => {
            println!(
                "  [{:3}] TABLEWRITE 0x{:012X} = 0x{:016X}_{:016X}",
                idx, address, word1, word0
            );
        }
        ImageCommand::Nop { words } if *words > 0 => {
            println!("  [{:3}] NOP ({} words)", idx, words);
        }
        _ => println!("  [{:3}] {:?}", idx, cmd),
    }
}
