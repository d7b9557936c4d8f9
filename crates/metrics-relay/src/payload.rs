// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

/// Shape of a metric export payload. Validation is structural only: the four
/// fields below are permitted, anything else rejects the payload. A field may
/// be absent or JSON `null`; both count as empty. The decoded value is
/// discarded; accepted requests forward the raw body bytes, never a
/// re-serialized struct.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricPayload {
    #[serde(rename = "techIDs")]
    pub tech_ids: Option<Vec<String>>,
    #[serde(rename = "itemIDs")]
    pub item_ids: Option<Vec<String>>,
    #[serde(rename = "ignoredItemIDs")]
    pub ignored_item_ids: Option<Vec<String>>,
    pub format: Option<String>,
}

/// Returns true iff the body starts with one JSON value that decodes as a
/// [`MetricPayload`] with no unknown fields. Only the first value is
/// examined; trailing bytes are ignored. A top-level `null` decodes to an
/// empty payload. No semantic validation of field contents is performed.
pub fn is_valid(body: &[u8]) -> bool {
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    Option::<MetricPayload>::deserialize(&mut deserializer).is_ok()
}
