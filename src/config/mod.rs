//! Configuration: connections, the worker, the compiler and the result
//! cache, loaded from `sieve.toml`.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, CompilerSettings, ConnectionSettings, Settings, SettingsError,
    WorkerSettings,
};
