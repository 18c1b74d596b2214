use crate::errors::Error;
use crate::model::ProjectModel;
use crate::settings::Settings;
use std::time::Duration;

pub struct ActionTree {
    pub show_files: bool,
}

impl ActionTree {
    pub fn perform(&self, settings: &Settings) -> Result<(), Error> {
        let mut model =
            ProjectModel::open(&settings.root, settings.model_options())?;
        model.wait_until_settled(Duration::from_secs(300));
        let stdout = std::io::stdout();
        model.write_tree(&mut stdout.lock(), self.show_files)
    }
}
