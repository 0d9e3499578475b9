/// Backend REST API integration: facility GeoJSON, sport names and the
/// installation-number to database-id table.
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    Config, Feature, FeatureCollection, ServiceError, Sports,
    http::ApiClient,
};

const SAMPLE_FACILITIES: &str = include_str!("../data/sample_facilities.json");

#[derive(Deserialize)]
#[serde(untagged)]
enum SportEntry {
    Name(String),
    Named {
        #[serde(alias = "nom")]
        name: String,
    },
}

#[derive(Deserialize)]
struct IdMappingEntry {
    id: u64,
    inst_numero: String,
}

pub async fn fetch_all(
    client: &reqwest::Client,
    config: &Config,
) -> Result<(FeatureCollection, Vec<String>), ServiceError> {
    let api = ApiClient::new(client.clone(), &config.api_url);

    let (raw, sports) = tokio::try_join!(fetch_geojson(&api), fetch_sports(&api))?;

    let mapping = if config.id_mapping {
        match fetch_id_mapping(&api).await {
            Ok(mapping) => mapping,
            Err(err) => {
                tracing::warn!("id mapping unavailable, keeping installation numbers: {}", err);
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    Ok((normalize_collection(raw, &mapping), sports))
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<Value>,
}

async fn fetch_geojson(api: &ApiClient) -> Result<FeatureCollection, ServiceError> {
    let raw: RawCollection = api.get_json("geojson/").await?;
    Ok(decode_features(raw.features))
}

/// Decodes features one by one; a feature that is not a usable point is
/// dropped instead of failing the whole collection.
pub fn decode_features(raw: Vec<Value>) -> FeatureCollection {
    let total = raw.len();
    let features: Vec<Feature> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Feature>(value) {
            Ok(feature) => Some(feature),
            Err(err) => {
                tracing::debug!("feature {} skipped: {}", index, err);
                None
            }
        })
        .collect();

    if features.len() < total {
        tracing::warn!("dropped {} malformed facilities", total - features.len());
    }
    FeatureCollection::new(features)
}

async fn fetch_sports(api: &ApiClient) -> Result<Vec<String>, ServiceError> {
    let entries: Vec<SportEntry> = api.get_json("sports/").await?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            SportEntry::Name(name) | SportEntry::Named { name } => name.trim().to_string(),
        })
        .filter(|name| !name.is_empty())
        .collect())
}

async fn fetch_id_mapping(api: &ApiClient) -> Result<HashMap<String, u64>, ServiceError> {
    let entries: Vec<IdMappingEntry> = api.get_json("installations/").await?;
    tracing::debug!("id mapping holds {} installations", entries.len());
    Ok(entries
        .into_iter()
        .map(|entry| (entry.inst_numero, entry.id))
        .collect())
}

/// Settles each feature on one identifier and one sports representation.
///
/// The identifier is `properties.id`, then the feature id, then `gid`/`fid`;
/// it is written back to both places. Features without any are dropped.
pub fn normalize_collection(raw: FeatureCollection, mapping: &HashMap<String, u64>) -> FeatureCollection {
    let total = raw.features.len();
    let features: Vec<Feature> = raw
        .features
        .into_iter()
        .filter_map(|feature| normalize_feature(feature, mapping))
        .collect();

    if features.len() < total {
        tracing::warn!(
            "dropped {} facilities without an identifier",
            total - features.len()
        );
    }
    FeatureCollection::new(features)
}

fn normalize_feature(mut feature: Feature, mapping: &HashMap<String, u64>) -> Option<Feature> {
    let properties = &feature.properties;
    let id = properties
        .id
        .as_ref()
        .and_then(identifier_text)
        .or_else(|| feature.id.as_ref().and_then(identifier_text))
        .or_else(|| properties.extra.get("gid").and_then(identifier_text))
        .or_else(|| properties.extra.get("fid").and_then(identifier_text))?;

    let sports = feature.properties.sports.names();
    feature.properties.sports = Sports::List(sports);
    if let Some(db_id) = mapping.get(&id) {
        feature.properties.db_id = Some(*db_id);
    }
    feature.id = Some(Value::String(id.clone()));
    feature.properties.id = Some(Value::String(id));
    Some(feature)
}

fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Facilities served when running without a backend.
pub fn mock_collection() -> Result<FeatureCollection, ServiceError> {
    let raw: FeatureCollection = serde_json::from_str(SAMPLE_FACILITIES)
        .map_err(|err| ServiceError::Decode(format!("sample facilities: {err}")))?;
    Ok(normalize_collection(raw, &HashMap::new()))
}

/// Distinct sport names of a collection, sorted ignoring case and accents.
pub fn sports_from_collection(collection: &FeatureCollection) -> Vec<String> {
    let mut sports: Vec<String> = Vec::new();
    for feature in &collection.features {
        for name in feature.properties.sports.names() {
            if !sports.contains(&name) {
                sports.push(name);
            }
        }
    }
    sports.sort_by_key(|name| crate::normalize(name));
    sports
}
