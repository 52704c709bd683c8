//! Command execution. Every command produces a JSON document.

use serde_json::{json, Value};

use dataset_reader::{DatasetOpener, VariableCatalog};
use grid_common::{DatasetError, DatasetResult};

use crate::cli::Command;

pub async fn run(command: &Command, opener: &DatasetOpener) -> DatasetResult<Value> {
    let dataset = command.dataset();
    let opts = dataset.options(opener.default_options());
    let catalog = VariableCatalog::new(opener);

    match command {
        Command::Variables { .. } => {
            let names = catalog.list_variables(&dataset.locator, &opts).await?;
            Ok(json!(names))
        }
        Command::Info {
            variable,
            drop_dim,
            show_times,
            ..
        } => {
            let info = catalog
                .describe_variable(
                    &dataset.locator,
                    &opts,
                    variable,
                    drop_dim.as_deref(),
                    *show_times,
                )
                .await?;
            serde_json::to_value(info).map_err(DatasetError::from)
        }
    }
}

/// JSON body reported for a failed command.
pub fn error_body(err: &DatasetError) -> Value {
    json!({
        "error": err.kind(),
        "message": err.to_string(),
        "status": err.http_status_code(),
    })
}
