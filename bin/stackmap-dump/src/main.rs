use stackmap::jvm::class_file::{ClassConstantIndex, ConstantIndex, StackMapFrame, StackMapTable};
use stackmap::jvm::verifier::{Frame, VerificationType};
use stackmap::jvm::Error;
use stackmap::util::OffsetVec;

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::fs;
use std::path::PathBuf;

type Entry = VerificationType<ClassConstantIndex>;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("StackMapTable dumper")
        .version(crate_version!())
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Decode the body of a `StackMapTable` attribute and print its frames")
        .arg(
            Arg::new("locals")
                .long("locals")
                .value_name("TYPES")
                .value_parser(parse_entries)
                .help("Locals of the implicit first frame (eg. `#2,int,long`)"),
        )
        .arg(
            Arg::new("full")
                .long("full")
                .action(ArgAction::SetTrue)
                .help("Also print the locals and stack in effect at every frame"),
        )
        .arg(
            Arg::new("INPUT")
                .help("File holding the attribute body (without name index or length)")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .get_matches();

    let input = matches.get_one::<PathBuf>("INPUT").unwrap();
    log::info!("Reading '{}'", input.display());
    let bytes = fs::read(input)?;
    let table = StackMapTable::parse(&bytes)?;

    let entry = Frame {
        locals: matches
            .get_one::<Vec<Entry>>("locals")
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect(),
        stack: OffsetVec::new(),
    };
    let frames = Frame::reconstruct(&entry, &table.0)?;

    println!("{} frames", table.0.len());
    for (frame, (offset, reconstructed)) in table.0.iter().zip(&frames) {
        let kind = frame.kind();
        let (locals, stack) = frame.entries();
        print!(
            "@{:<6} {:<36} delta {:<5}",
            offset.0,
            format!("{} ({})", kind, kind.tag(frame.offset_delta())),
            frame.offset_delta()
        );
        if !locals.is_empty() {
            print!(" locals {}", render_all(locals.iter()));
        }
        if !stack.is_empty() {
            print!(" stack {}", render_all(stack.iter()));
        }
        println!();

        if matches.get_flag("full") {
            println!(
                "        locals {} stack {}",
                render_all(reconstructed.locals.iter().map(|(_, _, t)| t)),
                render_all(reconstructed.stack.iter().map(|(_, _, t)| t)),
            );
        }
    }

    Ok(())
}

fn render(entry: &Entry) -> String {
    match entry {
        VerificationType::Top => String::from("top"),
        VerificationType::Integer => String::from("int"),
        VerificationType::Float => String::from("float"),
        VerificationType::Long => String::from("long"),
        VerificationType::Double => String::from("double"),
        VerificationType::Null => String::from("null"),
        VerificationType::UninitializedThis => String::from("uninitializedThis"),
        VerificationType::Object(class) => class.to_string(),
        VerificationType::Uninitialized(offset) => format!("uninitialized@{}", offset),
    }
}

fn render_all<'a>(entries: impl Iterator<Item = &'a Entry>) -> String {
    let rendered: Vec<String> = entries.map(render).collect();
    format!("[{}]", rendered.join(", "))
}

/// Parse a comma-separated list of verification types, written the way `render` prints them
fn parse_entries(source: &str) -> Result<Vec<Entry>, String> {
    source
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry {
            "top" => Ok(VerificationType::Top),
            "int" => Ok(VerificationType::Integer),
            "float" => Ok(VerificationType::Float),
            "long" => Ok(VerificationType::Long),
            "double" => Ok(VerificationType::Double),
            "null" => Ok(VerificationType::Null),
            "uninitializedThis" => Ok(VerificationType::UninitializedThis),
            other => {
                if let Some(index) = other.strip_prefix('#') {
                    let index = index
                        .parse::<u16>()
                        .map_err(|err| format!("bad class index '{}': {}", other, err))?;
                    Ok(VerificationType::Object(ClassConstantIndex(ConstantIndex(index))))
                } else if let Some(offset) = other.strip_prefix("uninitialized@") {
                    let offset = offset
                        .parse::<u16>()
                        .map_err(|err| format!("bad offset '{}': {}", other, err))?;
                    Ok(VerificationType::Uninitialized(offset))
                } else {
                    Err(format!("unknown verification type '{}'", other))
                }
            }
        })
        .collect()
}
