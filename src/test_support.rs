//! Helpers for tests that touch process environment variables.

use std::env;
use std::sync::{Mutex, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

/// Clears every key in `scope`, applies `vars`, runs `f`, then restores the
/// previous values. Holds a process-wide lock for the whole call.
pub(crate) fn with_env_vars<R>(scope: &[&str], vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    let _guard = env_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous: Vec<(String, Option<String>)> = scope
        .iter()
        .map(|key| ((*key).to_string(), env::var(key).ok()))
        .collect();

    for key in scope {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let output = f();

    for (key, value) in previous {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    output
}
