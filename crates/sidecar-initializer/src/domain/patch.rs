//! Strategic merge patch construction.
//!
//! The patch only names fields that differ between the original and desired
//! snapshots, so concurrent edits to unrelated fields survive. Lists of named
//! objects (containers, volumes, the pending initializer queue, ...) are
//! merged element-wise by `name` with a `$setElementOrder` directive pinning
//! the desired order; other lists are replaced wholesale.

use error_stack::Report;
use error_stack::ResultExt;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::domain::InitializerError;
use crate::infrastructure::k8s::ClusterSession;
use crate::infrastructure::k8s::Workload;

/// Merge key of every list in [`NAME_MERGED_LISTS`].
const MERGE_KEY: &str = "name";

/// Fields whose list elements the API server merges by [`MERGE_KEY`].
const NAME_MERGED_LISTS: &[&str] = &[
    "pending",
    "containers",
    "initContainers",
    "ephemeralContainers",
    "volumes",
    "volumeMounts",
    "env",
    "imagePullSecrets",
];

const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";

/// A partial update for one Deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub namespace: String,
    pub name: String,
    pub body: Value,
}

impl PatchRequest {
    /// Diff `original` against `desired`.
    ///
    /// Returns `None` when the snapshots serialize identically.
    ///
    /// # Errors
    ///
    /// - [`InitializerError::DiffEncoding`] if either snapshot cannot be
    ///   serialized to a JSON object
    pub fn between(
        original: &Workload,
        desired: &Workload,
    ) -> Result<Option<Self>, Report<InitializerError>> {
        let encoding_error = || InitializerError::DiffEncoding {
            workload: original.key(),
        };

        let original_value = serde_json::to_value(original).change_context_lazy(encoding_error)?;
        let desired_value = serde_json::to_value(desired).change_context_lazy(encoding_error)?;

        let (Value::Object(original_map), Value::Object(desired_map)) =
            (&original_value, &desired_value)
        else {
            return Err(Report::new(encoding_error())
                .attach_printable("deployment did not serialize to a JSON object"));
        };

        let body = diff_maps(original_map, desired_map);
        if body.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            namespace: original.metadata.object.namespace.clone().unwrap_or_default(),
            name: original.metadata.object.name.clone().unwrap_or_default(),
            body: Value::Object(body),
        }))
    }

    /// Submit the patch through `session`.
    ///
    /// # Errors
    ///
    /// - [`InitializerError::PatchRejected`] if the API server refuses it
    pub async fn submit<S: ClusterSession>(
        &self,
        session: &S,
    ) -> Result<(), Report<InitializerError>> {
        session
            .patch_workload(&self.namespace, &self.name, &self.body)
            .await
            .change_context_lazy(|| InitializerError::PatchRejected {
                workload: format!("{}/{}", self.namespace, self.name),
            })
    }
}

/// Two-way diff of two JSON objects. Removed keys map to `null`.
fn diff_maps(original: &Map<String, Value>, desired: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, desired_value) in desired {
        match original.get(key) {
            None => {
                patch.insert(key.clone(), desired_value.clone());
            }
            Some(original_value) if original_value == desired_value => {}
            Some(original_value) => diff_field(key, original_value, desired_value, &mut patch),
        }
    }

    for key in original.keys() {
        if !desired.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

fn diff_field(key: &str, original: &Value, desired: &Value, patch: &mut Map<String, Value>) {
    match (original, desired) {
        (Value::Object(original), Value::Object(desired)) => {
            let nested = diff_maps(original, desired);
            if !nested.is_empty() {
                patch.insert(key.to_string(), Value::Object(nested));
            }
        }
        (Value::Array(original), Value::Array(desired))
            if NAME_MERGED_LISTS.contains(&key)
                && all_keyed(original)
                && all_keyed(desired) =>
        {
            diff_keyed_list(key, original, desired, patch);
        }
        _ => {
            patch.insert(key.to_string(), desired.clone());
        }
    }
}

fn merge_key(item: &Value) -> Option<&Value> {
    item.as_object()?.get(MERGE_KEY)
}

fn all_keyed(items: &[Value]) -> bool {
    items.iter().all(|item| merge_key(item).is_some())
}

fn find_by_key<'a>(items: &'a [Value], key: &Value) -> Option<&'a Value> {
    items.iter().find(|item| merge_key(item) == Some(key))
}

/// Element-wise diff of a list merged by name. Both lists are known to only
/// contain objects carrying the merge key.
fn diff_keyed_list(
    key: &str,
    original: &[Value],
    desired: &[Value],
    patch: &mut Map<String, Value>,
) {
    let mut items = Vec::new();

    for item in desired {
        let (Some(item_key), Value::Object(item_map)) = (merge_key(item), item) else {
            continue;
        };
        match find_by_key(original, item_key) {
            None => items.push(item.clone()),
            Some(previous) if previous == item => {}
            Some(previous) => {
                let mut nested = match previous {
                    Value::Object(previous_map) => diff_maps(previous_map, item_map),
                    _ => item_map.clone(),
                };
                nested.insert(MERGE_KEY.to_string(), item_key.clone());
                items.push(Value::Object(nested));
            }
        }
    }

    for item in original {
        if let Some(item_key) = merge_key(item) {
            if find_by_key(desired, item_key).is_none() {
                items.push(json!({ "$patch": "delete", MERGE_KEY: item_key }));
            }
        }
    }

    let order = desired
        .iter()
        .filter_map(merge_key)
        .map(|item_key| json!({ MERGE_KEY: item_key }))
        .collect();

    patch.insert(
        format!("{SET_ELEMENT_ORDER_PREFIX}{key}"),
        Value::Array(order),
    );
    if !items.is_empty() {
        patch.insert(key.to_string(), Value::Array(items));
    }
}
