use framework::discovery::{ADDRESS_LABEL, LabelSet, TargetGroup};
use serde::{Deserialize, Deserializer};

const GROUPS_LABEL: &str = "__meta_triton_groups";
const MACHINE_ID_LABEL: &str = "__meta_triton_machine_id";
const MACHINE_ALIAS_LABEL: &str = "__meta_triton_machine_alias";
const MACHINE_BRAND_LABEL: &str = "__meta_triton_machine_brand";
const MACHINE_IMAGE_LABEL: &str = "__meta_triton_machine_image";
const SERVER_ID_LABEL: &str = "__meta_triton_server_id";

/// `null` is decoded as the default value, like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default, deserialize_with = "null_as_default")]
    groups: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    server_uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vm_alias: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vm_brand: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vm_image_uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vm_uuid: String,
}

/// Response of `/v{version}/discover`
#[derive(Debug, Default, Deserialize)]
struct DiscoveryResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    containers: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
struct GlobalZone {
    #[serde(default, deserialize_with = "null_as_default")]
    server_uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    server_hostname: String,
}

/// Response of `/v{version}/gz/discover`
#[derive(Debug, Default, Deserialize)]
struct GzDiscoveryResponse {
    #[serde(default, rename = "cns", deserialize_with = "null_as_default")]
    global_zones: Vec<GlobalZone>,
}

/// Decode the containers response and build one target per container.
pub fn process_vm(
    data: &[u8],
    source: &str,
    dns_suffix: &str,
    port: u16,
) -> Result<TargetGroup, serde_json::Error> {
    let resp = serde_json::from_slice::<Option<DiscoveryResponse>>(data)?.unwrap_or_default();

    let mut group = TargetGroup::new(source);
    group.targets = resp
        .containers
        .into_iter()
        .map(|container| {
            let mut labels = LabelSet::from([
                (
                    ADDRESS_LABEL.to_string(),
                    format!("{}.{}:{}", container.vm_uuid, dns_suffix, port),
                ),
                (MACHINE_ID_LABEL.to_string(), container.vm_uuid),
                (MACHINE_ALIAS_LABEL.to_string(), container.vm_alias),
                (MACHINE_BRAND_LABEL.to_string(), container.vm_brand),
                (MACHINE_IMAGE_LABEL.to_string(), container.vm_image_uuid),
                (SERVER_ID_LABEL.to_string(), container.server_uuid),
            ]);

            // wrapped with commas, so `,web,` never matches `,web-staging,`
            if !container.groups.is_empty() {
                labels.insert(
                    GROUPS_LABEL.to_string(),
                    format!(",{},", container.groups.join(",")),
                );
            }

            labels
        })
        .collect();

    Ok(group)
}

/// Decode the global zones response and build one target per compute node.
pub fn process_gz(
    data: &[u8],
    source: &str,
    dns_suffix: &str,
    port: u16,
) -> Result<TargetGroup, serde_json::Error> {
    let resp = serde_json::from_slice::<Option<GzDiscoveryResponse>>(data)?.unwrap_or_default();

    let mut group = TargetGroup::new(source);
    group.targets = resp
        .global_zones
        .into_iter()
        .map(|gz| {
            LabelSet::from([
                (
                    ADDRESS_LABEL.to_string(),
                    format!("{}.{}:{}", gz.server_uuid, dns_suffix, port),
                ),
                (MACHINE_ID_LABEL.to_string(), gz.server_uuid),
                (MACHINE_ALIAS_LABEL.to_string(), gz.server_hostname),
                (MACHINE_BRAND_LABEL.to_string(), "gz".to_string()),
            ])
        })
        .collect();

    Ok(group)
}
