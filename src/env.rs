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
use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    sync::OnceLock,
};

use log::debug;

use crate::error::{Error, ImmutableSnafu, MissingKeySnafu, Result};

/// True-environment key holding the backend base URL.
pub const URL_VAR: &str = "NOT_ENV_URL";
/// True-environment key holding the bearer credential.
pub const API_KEY_VAR: &str = "NOT_ENV_API_KEY";

/// The bootstrap keys that always resolve from the true environment, never
/// from fetched data.
pub const PRESERVED_VARS: [&str; 2] = [URL_VAR, API_KEY_VAR];

/// A read-only environment surface backed by one fetched variable set plus a
/// snapshot of the preserved bootstrap keys.
///
/// `EnvOverride` is hermetic: only fetched keys and preserved keys are
/// visible, no matter what the true environment holds, and it will not update
/// if the environment is changed from within the process. Preserved keys
/// resolve from the snapshot taken at construction time even when the backend
/// returns a variable with the same name, so a misbehaving backend can never
/// shadow the bootstrap credentials.
#[derive(Debug)]
pub struct EnvOverride {
    variables: BTreeMap<String, String>,
    preserved: BTreeMap<String, String>,
    visible: BTreeSet<String>,
}

impl EnvOverride {
    /// Builds the override around `variables`, snapshotting each preserved
    /// key that is present in the true environment at this instant. Preserved
    /// keys absent from the environment are simply not preserved.
    #[must_use]
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        let preserved = PRESERVED_VARS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| ((*key).to_string(), value)))
            .collect();
        Self::from_parts(variables, preserved)
    }

    pub(crate) fn from_parts(
        variables: BTreeMap<String, String>,
        preserved: BTreeMap<String, String>,
    ) -> Self {
        let visible = variables.keys().chain(preserved.keys()).cloned().collect();
        Self {
            variables,
            preserved,
            visible,
        }
    }

    /// Looks up `key`, or `None` when it is not visible.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        if PRESERVED_VARS.contains(&key) {
            return self.preserved.get(key).map(String::as_str);
        }
        self.variables.get(key).map(String::as_str)
    }

    /// Looks up `key`, failing when it is not visible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingKey`] for an absent key. The mapping stays
    /// valid for subsequent calls.
    pub fn try_get(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| MissingKeySnafu { key }.build())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.visible.contains(key)
    }

    /// Every visible key, computed once at construction.
    #[must_use]
    pub fn keys(&self) -> &BTreeSet<String> {
        &self.visible
    }

    /// Every visible key resolved through [`EnvOverride::get`].
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, &str)> {
        self.visible
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.as_str(), value)))
            .collect()
    }

    /// Materializes every entry into an owned map. Preserved values win when
    /// a fetched key collides with a preserved key name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.variables.clone();
        map.extend(
            self.preserved
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        map
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Always fails: variables are managed by the not-env backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Immutable`].
    pub fn set(&self, _key: &str, _value: &str) -> Result<()> {
        ImmutableSnafu { action: "set" }.fail()
    }

    /// Always fails: variables are managed by the not-env backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Immutable`].
    pub fn remove(&self, _key: &str) -> Result<()> {
        ImmutableSnafu { action: "delete" }.fail()
    }

    /// Always fails: variables are managed by the not-env backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Immutable`].
    pub fn clear(&self) -> Result<()> {
        ImmutableSnafu { action: "clear" }.fail()
    }

    /// Always fails: variables are managed by the not-env backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Immutable`].
    pub fn extend<I>(&self, _entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        ImmutableSnafu { action: "update" }.fail()
    }
}

static INSTALLED: OnceLock<EnvOverride> = OnceLock::new();

/// Installs `overlay` as the process-wide environment surface.
///
/// Exactly one override can be live per process; it stays installed until
/// process exit.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] when an override is already
/// installed. The first override stays live.
pub fn install(overlay: EnvOverride) -> Result<()> {
    debug!(
        "installing environment override with {} visible keys",
        overlay.len()
    );
    INSTALLED
        .set(overlay)
        .map_err(|_| Error::AlreadyInitialized)
}

/// The installed override, if initialization has completed.
#[must_use]
pub fn installed() -> Option<&'static EnvOverride> {
    INSTALLED.get()
}

/// Looks up `key` through the installed override.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] before installation and
/// [`Error::MissingKey`] for an absent key.
pub fn var(key: &str) -> Result<String> {
    installed()
        .ok_or(Error::NotInitialized)?
        .try_get(key)
        .map(ToOwned::to_owned)
}

/// Every visible entry of the installed override.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] before installation.
pub fn vars() -> Result<Vec<(String, String)>> {
    let overlay = installed().ok_or(Error::NotInitialized)?;
    Ok(overlay
        .entries()
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}
