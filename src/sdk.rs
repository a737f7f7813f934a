/*
 * Copyright 2024 The Twelve-Factor Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use std::process;

use log::{error, info};

use crate::{
    env::{self, EnvOverride, API_KEY_VAR, URL_VAR},
    error::{MissingSettingSnafu, Result},
    fetch,
};

/// The bootstrap credentials, resolved once before any network access.
#[derive(Debug)]
pub struct Bootstrap {
    url: String,
    api_key: String,
}

impl Bootstrap {
    /// Resolves the backend URL and API key: explicit arguments win, the true
    /// environment's `NOT_ENV_URL`/`NOT_ENV_API_KEY` are the fallback.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingSetting`] naming the first setting that
    /// resolves to nothing or to an empty string. No request is sent in that
    /// case.
    pub fn resolve(url: Option<&str>, api_key: Option<&str>) -> Result<Self> {
        let url = resolve_setting(url, URL_VAR)?;
        let api_key = resolve_setting(api_key, API_KEY_VAR)?;
        Ok(Self { url, api_key })
    }

    /// Runs the single fetch attempt and builds the override around the
    /// result, snapshotting the preserved keys at that instant.
    ///
    /// # Errors
    ///
    /// Propagates the fetch errors of [`fetch::fetch_variables`].
    pub fn run(&self) -> Result<EnvOverride> {
        let variables = fetch::fetch_variables(&self.url, &self.api_key)?;
        info!("fetched {} variables from {}", variables.len(), self.url);
        Ok(EnvOverride::new(variables))
    }
}

fn resolve_setting(explicit: Option<&str>, name: &'static str) -> Result<String> {
    explicit
        .map(ToOwned::to_owned)
        .or_else(|| std::env::var(name).ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MissingSettingSnafu { name }.build())
}

/// Fetches variables from the backend and installs the hermetic override,
/// returning any failure to the caller.
///
/// The whole sequence runs synchronously on the calling thread: credential
/// resolution, one blocking fetch (the only suspension point), override
/// construction, installation. When this returns `Ok`, the override is fully
/// installed and every later lookup observes it.
///
/// # Errors
///
/// Any [`crate::Error`] from credential resolution, the fetch, or
/// installation. Nothing is installed on failure.
pub fn try_initialize(url: Option<&str>, api_key: Option<&str>) -> Result<()> {
    let bootstrap = Bootstrap::resolve(url, api_key)?;
    let overlay = bootstrap.run()?;
    env::install(overlay)
}

/// Initializes the SDK, terminating the process on any failure.
///
/// Call this at the very start of the program, before anything reads the
/// environment. On failure the error is reported to stderr and the process
/// exits with a non-zero status; this never returns control to a program that
/// would otherwise run with a missing or partial environment.
pub fn initialize(url: Option<&str>, api_key: Option<&str>) {
    if let Err(e) = try_initialize(url, api_key) {
        error!("not-env initialization failed: {e}");
        eprintln!("Failed to initialize not-env-sdk: {e}");
        process::exit(1);
    }
}
