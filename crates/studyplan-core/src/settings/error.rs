use thiserror::Error;

use crate::api::ApiError;
use crate::models::ChangeType;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Value for {change_type}.{field} does not fit the field: {source}")]
    InvalidValue {
        change_type: ChangeType,
        field: String,
        #[source]
        source: serde_json::Error,
    },
}
