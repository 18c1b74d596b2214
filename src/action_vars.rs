use crate::errors::Error;
use crate::model::ProjectModel;
use crate::settings::Settings;
use std::path::PathBuf;
use std::time::Duration;

pub struct ActionVars {
    pub pro: PathBuf,
}

impl ActionVars {
    pub fn perform(&self, settings: &Settings) -> Result<(), Error> {
        let mut model =
            ProjectModel::open(&settings.root, settings.model_options())?;
        model.wait_until_settled(Duration::from_secs(300));
        let node = model
            .find_node(&self.pro)
            .ok_or_else(|| Error::not_found(self.pro.display()))?;
        let stdout = std::io::stdout();
        model.write_vars(&mut stdout.lock(), node)
    }
}
