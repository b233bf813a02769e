// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

pub mod prompts;
pub mod provider;
pub mod providers;
pub mod registry;

pub use registry::{
    ProviderCatalogue, ProviderHandle, ProviderKind, ProviderRegistry, ProviderSettings,
    RegistrySettings, resolve,
};
