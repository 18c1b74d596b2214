mod action_tree;
mod action_vars;
mod action_watch;
mod cli;
mod errors;
mod evalresult;
mod evaluate;
mod files;
mod graph;
mod lexer;
mod merge;
mod model;
mod nodes;
mod pro_scanner;
mod rawpro;
mod reader;
mod scheduler;
mod settings;
mod tokens;
mod variables;
mod watch;

use crate::action_tree::ActionTree;
use crate::action_vars::ActionVars;
use crate::action_watch::ActionWatch;
use crate::cli::Action;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let outcome = cli::parse_cli().and_then(|(settings, action)| {
        match action {
            Action::Tree { show_files } => {
                ActionTree { show_files }.perform(&settings)
            }
            Action::Vars { pro } => ActionVars { pro }.perform(&settings),
            Action::Watch => ActionWatch {}.perform(&settings),
        }
    });
    if let Err(e) = outcome {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
