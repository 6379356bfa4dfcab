//! settings-stack: Layered configuration resolution for typed settings
//!
//! Declare the shape of your settings once as a [`Schema`], register the
//! sources that may provide values (programmatic overrides, CLI arguments,
//! environment variables, dotenv files, secrets directories, config files,
//! the platform keyring), and [`SettingsBuilder`] resolves everything into
//! one JSON tree with a fixed precedence order: earlier sources win
//! conflicting keys, nested objects merge key-by-key, schema defaults fill
//! whatever remains.
//!
//! ```no_run
//! use settings_stack::{EnvOptions, Field, FieldKind, Schema, SettingsBuilder};
//!
//! # fn main() -> settings_stack::Result<()> {
//! let schema = Schema::builder("Service")
//!     .field(Field::new("host", FieldKind::Str).with_default("127.0.0.1"))
//!     .field(Field::new("port", FieldKind::Int).with_default(8000))
//!     .build();
//!
//! let resolved = SettingsBuilder::new(schema)
//!     .with_env_prefix("SERVICE_")
//!     .with_env(EnvOptions::new())
//!     .load()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod keymap;
pub mod merge;
pub mod schema;
pub mod settings;
pub mod sources;

pub use error::{Result, SettingsError, SourceError};
pub use schema::{
    Alias, AliasChoice, AliasPath, DecodeHint, ExtraPolicy, Field, FieldKind, FlagMode,
    PathSegment, Schema, SchemaBuilder,
};
pub use settings::{SettingsBuilder, SourceList};
pub use sources::cli::CliOptions;
pub use sources::dotenv::DotenvOptions;
pub use sources::env::EnvOptions;
pub use sources::file::{FileFormat, FileOptions};
#[cfg(feature = "keyring")]
pub use sources::keyring::KeyringOptions;
pub use sources::secrets::{MissingDirPolicy, SecretsOptions};
pub use sources::{ResolutionConfig, Source};
