// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod http_utils;
pub mod payload;
pub mod relay;
pub mod sink;
