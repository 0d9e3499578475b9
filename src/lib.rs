use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

pub mod auth;
pub mod backend;
pub mod cloudinary;
pub mod config;
pub mod error;
mod http;
pub mod report;
pub mod server;

pub use config::{CloudinaryConfig, Config, ServiceMode};
pub use error::{ConfigError, ServiceError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: feature_collection_type(),
            features,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Feature> {
        self.features
            .iter()
            .find(|feature| feature.facility_id() == Some(id))
    }
}

fn feature_collection_type() -> String {
    "FeatureCollection".to_string()
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn point_type() -> String {
    "Point".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Geometry,
    pub properties: FacilityProperties,
}

impl Feature {
    /// Canonical identifier, available once the collection went through
    /// [`backend::normalize_collection`].
    pub fn facility_id(&self) -> Option<&str> {
        self.properties.id.as_ref().and_then(Value::as_str)
    }

    pub fn longitude(&self) -> f64 {
        self.geometry.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.geometry.coordinates[1]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    /// `[longitude, latitude]`, GeoJSON order. An altitude is dropped.
    #[serde(deserialize_with = "point_coordinates")]
    pub coordinates: [f64; 2],
}

fn point_coordinates<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 2], D::Error> {
    let values = Vec::<f64>::deserialize(deserializer)?;
    match values.as_slice() {
        [longitude, latitude, ..] => Ok([*longitude, *latitude]),
        _ => Err(de::Error::invalid_length(values.len(), &"at least two coordinates")),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilityProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub sports: Sports,
    #[serde(default)]
    pub free_access: Value,
    #[serde(default)]
    pub inst_acc_handi_bool: Value,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub gestion: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FacilityProperties {
    pub fn is_free_access(&self) -> bool {
        match &self.free_access {
            Value::Bool(flag) => *flag,
            Value::String(text) => {
                let text = text.trim();
                text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("oui")
            }
            _ => false,
        }
    }

    pub fn is_accessible(&self) -> bool {
        self.inst_acc_handi_bool == Value::Bool(true)
    }
}

/// Sports practised at a facility; the backend sends either a list or a
/// Python-style string such as `"['Football', 'Basket-ball']"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sports {
    List(#[serde(deserialize_with = "names_skipping_nulls")] Vec<String>),
    Text(String),
    Missing,
}

impl Default for Sports {
    fn default() -> Self {
        Sports::List(Vec::new())
    }
}

impl Sports {
    pub fn names(&self) -> Vec<String> {
        let raw = match self {
            Sports::List(items) => items.clone(),
            Sports::Text(text) => parse_sports_text(text),
            Sports::Missing => Vec::new(),
        };
        raw.into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn display(&self) -> String {
        let names = self.names();
        if names.is_empty() {
            "Non spécifié".to_string()
        } else {
            names.join(", ")
        }
    }
}

fn names_skipping_nulls<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let names = Vec::<Option<String>>::deserialize(deserializer)?;
    Ok(names.into_iter().flatten().collect())
}

/// Quotes only delimit names inside a bracketed list, so "Jeu d'échecs"
/// in a plain comma-separated string stays whole.
fn parse_sports_text(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.starts_with('[') {
        let mut quoted = Vec::new();
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            if ch == '\'' || ch == '"' {
                let item: String = chars.by_ref().take_while(|next| *next != ch).collect();
                quoted.push(item);
            }
        }
        if !quoted.is_empty() {
            return quoted;
        }
    }

    text.trim_matches(|ch| ch == '[' || ch == ']')
        .split(',')
        .map(str::to_string)
        .collect()
}

/// Lowercases and strips diacritics so "Équitation" matches "equitation".
pub fn normalize(text: &str) -> String {
    text.trim()
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>()
        .to_lowercase()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacilityQuery {
    pub sports: Vec<String>,
    pub free_access_only: bool,
    pub accessible_only: bool,
}

impl FacilityQuery {
    pub fn is_empty(&self) -> bool {
        self.sports.is_empty() && !self.free_access_only && !self.accessible_only
    }
}

pub fn filter_facilities(collection: &FeatureCollection, query: &FacilityQuery) -> FeatureCollection {
    let filters: Vec<String> = query
        .sports
        .iter()
        .map(|sport| normalize(sport))
        .filter(|sport| !sport.is_empty())
        .collect();

    let features = collection
        .features
        .iter()
        .filter(|feature| filters.is_empty() || practises_any(feature, &filters))
        .filter(|feature| !query.free_access_only || feature.properties.is_free_access())
        .filter(|feature| !query.accessible_only || feature.properties.is_accessible())
        .cloned()
        .collect();

    FeatureCollection::new(features)
}

fn practises_any(feature: &Feature, filters: &[String]) -> bool {
    feature
        .properties
        .sports
        .names()
        .iter()
        .map(|name| normalize(name))
        .filter(|name| !name.is_empty())
        .any(|name| {
            filters
                .iter()
                .any(|filter| name.contains(filter.as_str()) || filter.contains(name.as_str()))
        })
}

pub const MIN_SUGGESTION_QUERY: usize = 2;

/// Sport names containing `query`, ignoring case and accents, in source order.
pub fn suggest_sports(sports: &[String], query: &str) -> Vec<String> {
    let query = query.trim();
    if query.chars().count() < MIN_SUGGESTION_QUERY {
        return Vec::new();
    }
    let needle = normalize(query);
    sports
        .iter()
        .filter(|sport| normalize(sport).contains(&needle))
        .cloned()
        .collect()
}

/// Facility data fetched from the backend, cached for the configured TTL.
pub struct FacilityService {
    client: reqwest::Client,
    config: Arc<Config>,
    cache: RwLock<Option<CacheEntry>>,
}

struct CacheEntry {
    fetched_at: Instant,
    facilities: Arc<FeatureCollection>,
    sports: Arc<Vec<String>>,
}

impl FacilityService {
    pub fn new(client: reqwest::Client, config: Arc<Config>) -> Self {
        Self {
            client,
            config,
            cache: RwLock::new(None),
        }
    }

    pub async fn facilities(&self) -> Result<Arc<FeatureCollection>, ServiceError> {
        let (facilities, _) = self.load().await?;
        Ok(facilities)
    }

    pub async fn sports(&self) -> Result<Arc<Vec<String>>, ServiceError> {
        let (_, sports) = self.load().await?;
        Ok(sports)
    }

    pub async fn search(&self, query: &FacilityQuery) -> Result<FeatureCollection, ServiceError> {
        let facilities = self.facilities().await?;
        Ok(filter_facilities(&facilities, query))
    }

    pub async fn suggestions(&self, query: &str) -> Result<Vec<String>, ServiceError> {
        let sports = self.sports().await?;
        Ok(suggest_sports(&sports, query))
    }

    async fn load(&self) -> Result<(Arc<FeatureCollection>, Arc<Vec<String>>), ServiceError> {
        let ttl: Duration = self.config.cache_ttl;
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < ttl {
                return Ok((cached.facilities.clone(), cached.sports.clone()));
            }
        }

        let (facilities, sports) = if self.config.mode.is_mock() {
            let facilities = backend::mock_collection()?;
            let sports = backend::sports_from_collection(&facilities);
            (facilities, sports)
        } else {
            backend::fetch_all(&self.client, &self.config).await?
        };
        tracing::info!(
            "loaded {} facilities and {} sports ({})",
            facilities.features.len(),
            sports.len(),
            self.config.mode.label()
        );

        let facilities = Arc::new(facilities);
        let sports = Arc::new(sports);
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            fetched_at: Instant::now(),
            facilities: facilities.clone(),
            sports: sports.clone(),
        });
        Ok((facilities, sports))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn facility(id: &str, sports: Sports, free_access: Value, accessible: Value) -> Feature {
        Feature {
            kind: feature_type(),
            id: None,
            geometry: Geometry {
                kind: point_type(),
                coordinates: [2.35, 48.85],
            },
            properties: FacilityProperties {
                id: Some(Value::String(id.to_string())),
                name: Some(format!("Facility {id}")),
                sports,
                free_access,
                inst_acc_handi_bool: accessible,
                ..FacilityProperties::default()
            },
        }
    }

    fn sample_collection() -> FeatureCollection {
        FeatureCollection::new(vec![
            facility(
                "I1",
                Sports::Text("['Football', 'Basket-Ball']".to_string()),
                json!(true),
                json!(true),
            ),
            facility(
                "I2",
                Sports::List(vec!["Équitation".to_string()]),
                json!("Oui"),
                json!(false),
            ),
            facility(
                "I3",
                Sports::Text("Tennis de table, Natation".to_string()),
                json!(false),
                json!("true"),
            ),
            facility("I4", Sports::Missing, json!("true"), Value::Null),
        ])
    }

    fn ids(collection: &FeatureCollection) -> Vec<&str> {
        collection
            .features
            .iter()
            .filter_map(Feature::facility_id)
            .collect()
    }

    #[test]
    fn empty_query_returns_input_unchanged() {
        let collection = sample_collection();
        let result = filter_facilities(&collection, &FacilityQuery::default());
        assert_eq!(result, collection);
    }

    #[test]
    fn sport_filter_matches_both_directions_ignoring_accents() {
        let collection = sample_collection();

        let query = FacilityQuery {
            sports: vec!["equitation".to_string()],
            ..FacilityQuery::default()
        };
        assert_eq!(ids(&filter_facilities(&collection, &query)), vec!["I2"]);

        // filter longer than the sport name
        let query = FacilityQuery {
            sports: vec!["Football américain".to_string()],
            ..FacilityQuery::default()
        };
        assert_eq!(ids(&filter_facilities(&collection, &query)), vec!["I1"]);

        // filter shorter than the sport name
        let query = FacilityQuery {
            sports: vec!["TENNIS".to_string(), "basket".to_string()],
            ..FacilityQuery::default()
        };
        assert_eq!(ids(&filter_facilities(&collection, &query)), vec!["I1", "I3"]);
    }

    #[test]
    fn every_result_matches_an_active_filter() {
        let collection = sample_collection();
        let filters = vec!["nat".to_string(), "ball".to_string()];
        let query = FacilityQuery {
            sports: filters.clone(),
            ..FacilityQuery::default()
        };
        let result = filter_facilities(&collection, &query);
        assert!(!result.features.is_empty());
        for feature in &result.features {
            let names: Vec<String> = feature
                .properties
                .sports
                .names()
                .iter()
                .map(|name| normalize(name))
                .collect();
            assert!(names.iter().any(|name| filters.iter().any(|filter| {
                let filter = normalize(filter);
                name.contains(&filter) || filter.contains(name.as_str())
            })));
        }
    }

    #[test]
    fn free_access_accepts_tolerant_truthy_values() {
        let collection = sample_collection();
        let query = FacilityQuery {
            free_access_only: true,
            ..FacilityQuery::default()
        };
        assert_eq!(ids(&filter_facilities(&collection, &query)), vec!["I1", "I2", "I4"]);
    }

    #[test]
    fn free_access_never_grows_the_result() {
        let collection = sample_collection();
        for sports in [vec![], vec!["foot".to_string()], vec!["natation".to_string()]] {
            for accessible_only in [false, true] {
                let off = FacilityQuery {
                    sports: sports.clone(),
                    free_access_only: false,
                    accessible_only,
                };
                let on = FacilityQuery {
                    free_access_only: true,
                    ..off.clone()
                };
                assert!(
                    filter_facilities(&collection, &on).features.len()
                        <= filter_facilities(&collection, &off).features.len()
                );
            }
        }
    }

    #[test]
    fn accessibility_requires_a_real_boolean() {
        let collection = sample_collection();
        let query = FacilityQuery {
            accessible_only: true,
            ..FacilityQuery::default()
        };
        assert_eq!(ids(&filter_facilities(&collection, &query)), vec!["I1"]);
    }

    #[test]
    fn parses_python_style_sport_strings() {
        let sports = Sports::Text("['Football', \"Basket-ball\"]".to_string());
        assert_eq!(sports.names(), vec!["Football", "Basket-ball"]);
        assert_eq!(sports.display(), "Football, Basket-ball");
        assert_eq!(Sports::Missing.display(), "Non spécifié");
    }

    #[test]
    fn apostrophes_in_plain_sport_strings_are_not_quotes() {
        let sports = Sports::Text("Jeu d'échecs, Tennis".to_string());
        assert_eq!(sports.names(), vec!["Jeu d'échecs", "Tennis"]);

        let sports = Sports::Text("[\"Jeu d'échecs\", 'Tennis']".to_string());
        assert_eq!(sports.names(), vec!["Jeu d'échecs", "Tennis"]);
    }

    #[test]
    fn tolerates_altitudes_and_null_sport_items() {
        let raw = json!({
            "geometry": {"type": "Point", "coordinates": [5.37, 43.29, 12.0]},
            "properties": {"id": "I1", "sports": ["Football", null, "Rugby"]}
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();
        assert_eq!(feature.geometry.coordinates, [5.37, 43.29]);
        assert_eq!(feature.properties.sports.names(), vec!["Football", "Rugby"]);

        let raw = json!({
            "geometry": {"type": "Point", "coordinates": [5.37]},
            "properties": {"id": "I2"}
        });
        assert!(serde_json::from_value::<Feature>(raw).is_err());
    }

    #[test]
    fn suggestions_need_two_characters() {
        let sports = vec![
            "Football".to_string(),
            "Équitation".to_string(),
            "Futsal".to_string(),
        ];
        assert!(suggest_sports(&sports, "f").is_empty());
        assert!(suggest_sports(&sports, "").is_empty());
        assert_eq!(suggest_sports(&sports, "fu"), vec!["Futsal"]);
        assert_eq!(suggest_sports(&sports, "EQUI"), vec!["Équitation"]);
        assert_eq!(suggest_sports(&sports, "t"), Vec::<String>::new());
        let all = suggest_sports(&sports, "t ");
        assert!(all.is_empty());
        let subset = suggest_sports(&sports, "al");
        assert!(subset.iter().all(|sport| sports.contains(sport)));
        assert_eq!(subset, vec!["Football", "Futsal"]);
    }

    #[test]
    fn deserializes_backend_feature() {
        let raw = json!({
            "type": "Feature",
            "id": 17,
            "geometry": {"type": "Point", "coordinates": [5.37, 43.29]},
            "properties": {
                "id": "I130010048",
                "name": "Stade Vélodrome",
                "type": "Terrain de football",
                "family": "Terrain de grands jeux",
                "sports": "['Football']",
                "free_access": "Oui",
                "inst_acc_handi_bool": true,
                "gid": 42
            }
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();
        assert_eq!(feature.facility_id(), Some("I130010048"));
        assert!(feature.properties.is_free_access());
        assert!(feature.properties.is_accessible());
        assert_eq!(feature.properties.extra.get("gid"), Some(&json!(42)));
        assert_eq!(feature.latitude(), 43.29);
    }
}
