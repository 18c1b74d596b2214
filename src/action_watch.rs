use crate::errors::Error;
use crate::model::{ModelEvent, ProjectModel};
use crate::settings::Settings;
use std::time::Duration;

pub struct ActionWatch {}

impl ActionWatch {
    pub fn perform(&self, settings: &Settings) -> Result<(), Error> {
        let mut model =
            ProjectModel::open(&settings.root, settings.model_options())?;
        model.wait_until_settled(Duration::from_secs(300));
        let stdout = std::io::stdout();
        model.write_tree(&mut stdout.lock(), false)?;
        println!("watching {} (ctrl-c to stop)", settings.root.display());

        loop {
            let mut events = model.process_completions(Duration::from_millis(200));
            events.extend(model.pump_fs_events());
            for event in events {
                match event {
                    ModelEvent::TreeChanged => {
                        println!("--- tree changed ---");
                        let stdout = std::io::stdout();
                        model.write_tree(&mut stdout.lock(), false)?;
                    }
                    ModelEvent::ParseStateChanged { pro_file } => {
                        println!("{}: parse state changed", pro_file.display());
                    }
                }
            }
        }
    }
}
