// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

pub mod gemini;
pub mod openai;
pub mod openrouter;
