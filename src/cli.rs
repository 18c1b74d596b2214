use crate::errors::Error;
use crate::settings::Settings;
use clap::{arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

pub enum Action {
    Tree { show_files: bool },
    Vars { pro: PathBuf },
    Watch,
}

fn to_abs(relpath: &PathBuf) -> Result<PathBuf, Error> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    Ok(cwd.join(relpath).canonicalize()?)
}

fn get_path(matches: &ArgMatches, id: &str) -> Result<PathBuf, Error> {
    to_abs(matches.get_one::<PathBuf>(id).unwrap())
}

/// Accept either a `.pro` file or a directory containing one.  In a
/// directory, `<dirname>.pro` wins, otherwise there must be exactly one
/// project file.
fn resolve_root(path: PathBuf) -> Result<PathBuf, Error> {
    if !path.is_dir() {
        return Ok(path);
    }
    let base = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("");
    let candidate = path.join(format!("{}.pro", base));
    if candidate.is_file() {
        return Ok(candidate);
    }
    let mut found = vec![];
    for entry in std::fs::read_dir(&path)?.flatten() {
        let p = entry.path();
        if p.extension().and_then(std::ffi::OsStr::to_str) == Some("pro") {
            found.push(p);
        }
    }
    match found.len() {
        1 => Ok(found.pop().unwrap()),
        _ => Err(Error::not_found(format!(
            "root project file in {}",
            path.display()
        ))),
    }
}

pub fn parse_cli() -> Result<(Settings, Action), Error> {
    let matches = Command::new("promodel")
        .version("0.1")
        .about("Incremental model of qmake project trees")
        .subcommand_required(true)
        .subcommand_precedence_over_arg(true) //  --x val1 val2 subcommand
        .flatten_help(true) // Show help for all subcommands as well
        .arg_required_else_help(true) // show full help if nothing given
        .args([
            arg!(--root <PRO_OR_DIR> "Root project file or directory")
                .global(true)
                .default_value(".")
                .value_parser(clap::value_parser!(PathBuf)),
            arg!(--build_dir <DIR> "Shadow build directory")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
            arg!(--config <ATOM> ... "Extra active CONFIG atoms")
                .global(true),
            arg!(--sysroot <DIR> "Target sysroot")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
            arg!(--debounce <MS> "File-change debounce, in milliseconds")
                .global(true)
                .default_value("500")
                .value_parser(clap::value_parser!(u64)),
        ])
        .subcommand(
            Command::new("tree")
                .about("Print the evaluated project tree")
                .arg(
                    arg!(-f --files "Also list the files of every node")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("vars")
                .about("Print the variables of one project")
                .arg(
                    arg!([PROJECT] "Project to show (defaults to the root)")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Keep the model live and report changes"),
        )
        .get_matches();

    let settings = Settings {
        build_dir: matches
            .get_one::<PathBuf>("build_dir")
            .map(to_abs)
            .transpose()?,
        config: matches
            .get_many::<String>("config")
            .into_iter()
            .flatten()
            .cloned()
            .collect(),
        sysroot: matches
            .get_one::<PathBuf>("sysroot")
            .map(to_abs)
            .transpose()?,
        debounce_ms: *matches.get_one::<u64>("debounce").unwrap(),
        root: resolve_root(get_path(&matches, "root")?)?,
    };

    match matches.subcommand() {
        Some(("tree", sub)) => Ok((
            settings,
            Action::Tree {
                show_files: sub.get_flag("files"),
            },
        )),
        Some(("vars", sub)) => {
            let pro = match sub.get_one::<PathBuf>("PROJECT") {
                Some(p) => to_abs(p)?,
                None => settings.root.clone(),
            };
            Ok((settings, Action::Vars { pro }))
        }
        Some(("watch", _)) => Ok((settings, Action::Watch)),
        _ => unreachable!(),
    }
}
