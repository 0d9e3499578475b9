use std::rc::Rc;

use serde::Serialize;

pub const ACTIVE_ICON: &str = "map-pin-active";
pub const DEFAULT_ICON: &str = "map-pin";
pub const DEEP_LINK_ZOOM: f64 = 18.0;
pub const MIN_QUERY_CHARS: usize = 2;

pub const SPORT_COLORS: [&str; 10] = [
    "#86efac", "#fdba74", "#fde047", "#93c5fd", "#5eead4", "#fca5a5", "#d8b4fe", "#f9a8d4",
    "#a5b4fc", "#d1d5db",
];

/// The one panel shown over the map. `Detail` carries the selected facility.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Overlay {
    #[default]
    None,
    Filters,
    Sports,
    Detail(String),
    Nav,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapUiState {
    pub overlay: Overlay,
}

impl MapUiState {
    pub fn selected(&self) -> Option<&str> {
        match &self.overlay {
            Overlay::Detail(id) => Some(id),
            _ => None,
        }
    }

    pub fn marker_clicked(&mut self, id: &str) {
        self.overlay = Overlay::Detail(id.to_string());
    }

    pub fn canvas_clicked(&mut self) {
        self.overlay = Overlay::None;
    }

    pub fn close(&mut self) {
        self.overlay = Overlay::None;
    }

    /// Opens `overlay`, or closes it when it is already open.
    pub fn toggle(&mut self, overlay: Overlay) {
        if self.overlay == overlay {
            self.overlay = Overlay::None;
        } else {
            self.overlay = overlay;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerStyle {
    pub icon: &'static str,
    pub color: &'static str,
    pub radius: f64,
}

pub fn marker_style(selected: Option<&str>, id: &str) -> MarkerStyle {
    if selected == Some(id) {
        MarkerStyle {
            icon: ACTIVE_ICON,
            color: "#e74c3c",
            radius: 11.0,
        }
    } else {
        MarkerStyle {
            icon: DEFAULT_ICON,
            color: "#3498db",
            radius: 6.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Viewport {
    Mobile,
    Medium,
    Desktop,
}

impl Viewport {
    pub fn from_width(width: f64) -> Self {
        if width < 768.0 {
            Viewport::Mobile
        } else if width < 1024.0 {
            Viewport::Medium
        } else {
            Viewport::Desktop
        }
    }

    /// Pixels the selected facility is lifted above the detail panel.
    pub fn pan_offset(self) -> f64 {
        match self {
            Viewport::Mobile => 200.0,
            Viewport::Medium => 150.0,
            Viewport::Desktop => 100.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
}

impl Default for ViewState {
    /// Metropolitan France.
    fn default() -> Self {
        Self {
            longitude: 2.2137,
            latitude: 46.2276,
            zoom: 5.0,
        }
    }
}

/// Body of `POST /api/facilities/search`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FacilityQuery {
    pub sports: Vec<String>,
    pub free_access_only: bool,
    pub accessible_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub suggestions: Vec<String>,
    pub active_filters: Vec<String>,
    pub free_access_only: bool,
    pub accessible_only: bool,
}

impl SearchState {
    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        if self.suggestion_query().is_none() {
            self.suggestions.clear();
        }
    }

    /// Trimmed query when it is long enough to ask for suggestions.
    pub fn suggestion_query(&self) -> Option<&str> {
        let trimmed = self.query.trim();
        (trimmed.chars().count() >= MIN_QUERY_CHARS).then_some(trimmed)
    }

    /// Applies suggestions fetched for `query`, ignoring answers that
    /// arrive after the text changed.
    pub fn receive_suggestions(&mut self, query: &str, suggestions: Vec<String>) {
        if self.query.trim() == query {
            self.suggestions = suggestions;
        }
    }

    pub fn select_suggestion(&mut self, sport: &str) {
        if !self.active_filters.iter().any(|active| active == sport) {
            self.active_filters.push(sport.to_string());
        }
        self.suggestions.clear();
        self.query.clear();
    }

    pub fn remove_filter(&mut self, sport: &str) {
        self.active_filters.retain(|active| active != sport);
    }

    pub fn to_query(&self) -> FacilityQuery {
        FacilityQuery {
            sports: self.active_filters.clone(),
            free_access_only: self.free_access_only,
            accessible_only: self.accessible_only,
        }
    }
}

/// Facilities shown on the map, tied to the query that produced them.
#[derive(Clone, Debug, PartialEq)]
pub struct Results<T> {
    pub query: Option<FacilityQuery>,
    pub collection: Option<Rc<T>>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for Results<T> {
    fn default() -> Self {
        Self {
            query: None,
            collection: None,
            loading: false,
            error: None,
        }
    }
}

impl<T> Results<T> {
    /// Starts waiting for `query`; earlier requests become stale.
    pub fn request(&mut self, query: FacilityQuery) {
        self.query = Some(query);
        self.loading = true;
        self.error = None;
    }

    fn is_current(&self, query: &FacilityQuery) -> bool {
        self.query.as_ref() == Some(query)
    }

    pub fn receive(&mut self, query: &FacilityQuery, collection: T) {
        if self.is_current(query) {
            self.collection = Some(Rc::new(collection));
            self.loading = false;
        }
    }

    pub fn fail(&mut self, query: &FacilityQuery, error: String) {
        if self.is_current(query) {
            self.error = Some(error);
            self.loading = false;
        }
    }
}

/// Decoded `key=value` pairs of a location search string.
pub fn query_params(search: &str) -> Vec<(String, String)> {
    search
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(text: &str) -> String {
    let text = text.replace('+', " ");
    urlencoding::decode(&text)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(text)
}

pub fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeepLink {
    pub equipment_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub zoom: Option<f64>,
    pub sport: Option<String>,
}

impl DeepLink {
    pub fn parse(search: &str) -> Self {
        let params = query_params(search);
        let number = |key: &str| param(&params, key).and_then(|value| value.parse::<f64>().ok());
        Self {
            equipment_id: param(&params, "equipmentId").map(str::to_string),
            lat: number("lat"),
            lng: number("lng"),
            zoom: number("zoom"),
            sport: param(&params, "sport").map(str::to_string),
        }
    }

    /// Facility to select and where to look, when the link names both.
    pub fn target(&self) -> Option<(&str, ViewState)> {
        let id = self.equipment_id.as_deref()?;
        Some((
            id,
            ViewState {
                longitude: self.lng?,
                latitude: self.lat?,
                zoom: self.zoom.unwrap_or(DEEP_LINK_ZOOM),
            },
        ))
    }
}

/// Pages of the client, chosen from the location path.
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    Map,
    Report,
    Register,
    Verification { email: String },
    ForgotPassword,
    ResetPassword { token: String },
}

impl Route {
    pub fn parse(path: &str, search: &str) -> Self {
        let path = path.trim_end_matches('/');
        if let Some(token) = path.strip_prefix("/reset-password/") {
            let token = decode(token);
            if !token.is_empty() && !token.contains('/') {
                return Route::ResetPassword { token };
            }
        }
        match path {
            "/report" => Route::Report,
            "/register" => Route::Register,
            "/verification" => Route::Verification {
                email: param(&query_params(search), "email")
                    .unwrap_or_default()
                    .to_string(),
            },
            "/forgot-password" => Route::ForgotPassword,
            _ => Route::Map,
        }
    }
}

pub fn verification_url(email: &str) -> String {
    format!("/verification?email={}", urlencoding::encode(email))
}

pub fn share_url(origin: &str, id: &str, latitude: f64, longitude: f64) -> String {
    format!(
        "{}/map?equipmentId={}&lat={}&lng={}&zoom=18",
        origin.trim_end_matches('/'),
        urlencoding::encode(id),
        latitude,
        longitude
    )
}

pub fn report_url(report_id: &str, name: &str, latitude: f64, longitude: f64) -> String {
    format!(
        "/report?equipmentId={}&equipmentName={}&lat={}&lng={}",
        urlencoding::encode(report_id),
        urlencoding::encode(name),
        latitude,
        longitude
    )
}

/// Facility websites are stored with or without a scheme.
pub fn external_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub fn sport_color(index: usize) -> &'static str {
    SPORT_COLORS[index % SPORT_COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 4] = ["I1", "I2", "I3", "I4"];

    fn styles(state: &MapUiState) -> Vec<MarkerStyle> {
        IDS.iter()
            .map(|id| marker_style(state.selected(), id))
            .collect()
    }

    #[test]
    fn selecting_another_marker_restyles_only_the_two() {
        let mut state = MapUiState::default();
        state.marker_clicked("I2");
        let before = styles(&state);
        state.marker_clicked("I4");
        let after = styles(&state);

        let changed: Vec<&str> = IDS
            .iter()
            .zip(before.iter().zip(after.iter()))
            .filter(|(_, (a, b))| a != b)
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(changed, vec!["I2", "I4"]);
        assert_eq!(after[3].icon, ACTIVE_ICON);
        assert_eq!(after[3].radius, 11.0);
        assert_eq!(after[1].icon, DEFAULT_ICON);
    }

    #[test]
    fn canvas_click_clears_selection_and_overlays() {
        let mut state = MapUiState::default();
        state.marker_clicked("I1");
        state.canvas_clicked();
        assert_eq!(state.overlay, Overlay::None);
        assert_eq!(state.selected(), None);

        state.toggle(Overlay::Filters);
        state.canvas_clicked();
        assert_eq!(state.overlay, Overlay::None);
    }

    #[test]
    fn opening_a_panel_replaces_the_detail_view() {
        let mut state = MapUiState::default();
        state.marker_clicked("I1");
        state.toggle(Overlay::Nav);
        assert_eq!(state.overlay, Overlay::Nav);
        assert_eq!(state.selected(), None);
        state.toggle(Overlay::Nav);
        assert_eq!(state.overlay, Overlay::None);
    }

    #[test]
    fn pan_offset_follows_viewport_width() {
        assert_eq!(Viewport::from_width(375.0).pan_offset(), 200.0);
        assert_eq!(Viewport::from_width(768.0).pan_offset(), 150.0);
        assert_eq!(Viewport::from_width(1023.0), Viewport::Medium);
        assert_eq!(Viewport::from_width(1440.0).pan_offset(), 100.0);
    }

    #[test]
    fn suggestions_need_two_characters() {
        let mut search = SearchState {
            suggestions: vec!["Football".to_string()],
            ..SearchState::default()
        };
        search.set_query(" f ");
        assert_eq!(search.suggestion_query(), None);
        assert!(search.suggestions.is_empty());
        search.set_query("fo ");
        assert_eq!(search.suggestion_query(), Some("fo"));
    }

    #[test]
    fn stale_suggestions_are_dropped() {
        let mut search = SearchState::default();
        search.set_query("fo");
        search.set_query("foo");
        search.receive_suggestions("fo", vec!["Football".to_string()]);
        assert!(search.suggestions.is_empty());
        search.receive_suggestions("foo", vec!["Football".to_string()]);
        assert_eq!(search.suggestions, vec!["Football"]);
    }

    #[test]
    fn routes_follow_the_path() {
        assert_eq!(Route::parse("/", ""), Route::Map);
        assert_eq!(Route::parse("/map", "?equipmentId=I1"), Route::Map);
        assert_eq!(Route::parse("/report/", "?equipmentId=I1"), Route::Report);
        assert_eq!(Route::parse("/register", ""), Route::Register);
        assert_eq!(Route::parse("/forgot-password", ""), Route::ForgotPassword);
        assert_eq!(
            Route::parse("/reset-password/abc123", ""),
            Route::ResetPassword {
                token: "abc123".to_string()
            }
        );
        assert_eq!(Route::parse("/reset-password/", ""), Route::Map);
    }

    #[test]
    fn verification_carries_the_email() {
        let url = verification_url("jane+sport@example.org");
        assert_eq!(url, "/verification?email=jane%2Bsport%40example.org");
        let (path, search) = url.split_once('?').unwrap();
        assert_eq!(
            Route::parse(path, &format!("?{search}")),
            Route::Verification {
                email: "jane+sport@example.org".to_string()
            }
        );
    }

    #[test]
    fn stale_facility_results_are_dropped() {
        let football = FacilityQuery {
            sports: vec!["Football".to_string()],
            ..FacilityQuery::default()
        };
        let football_free = FacilityQuery {
            free_access_only: true,
            ..football.clone()
        };

        let mut results = Results::default();
        results.request(football.clone());
        results.request(football_free.clone());
        results.receive(&football_free, vec!["I693830021"]);
        assert!(!results.loading);

        results.receive(&football, vec!["I130010048", "I693830021"]);
        results.fail(&football, "boom".to_string());
        assert_eq!(results.collection.as_deref(), Some(&vec!["I693830021"]));
        assert_eq!(results.error, None);
        assert_eq!(results.query, Some(football_free));
    }

    #[test]
    fn failed_request_keeps_previous_results() {
        let query = FacilityQuery::default();
        let mut results = Results::default();
        results.request(query.clone());
        results.receive(&query, vec!["I1"]);

        let accessible = FacilityQuery {
            accessible_only: true,
            ..FacilityQuery::default()
        };
        results.request(accessible.clone());
        assert!(results.loading);
        results.fail(&accessible, "Erreur".to_string());
        assert!(!results.loading);
        assert_eq!(results.error.as_deref(), Some("Erreur"));
        assert_eq!(results.collection.as_deref(), Some(&vec!["I1"]));
    }

    #[test]
    fn selected_suggestions_are_deduplicated() {
        let mut search = SearchState::default();
        search.set_query("te");
        search.receive_suggestions("te", vec!["Tennis".to_string()]);
        search.select_suggestion("Tennis");
        search.select_suggestion("Natation");
        search.select_suggestion("Tennis");
        assert_eq!(search.active_filters, vec!["Tennis", "Natation"]);
        assert!(search.suggestions.is_empty());

        search.remove_filter("Tennis");
        assert_eq!(search.to_query().sports, vec!["Natation"]);
    }

    #[test]
    fn deep_link_defaults_zoom() {
        let link = DeepLink::parse("?equipmentId=I130010048&lat=43.27&lng=5.39");
        let (id, view) = link.target().unwrap();
        assert_eq!(id, "I130010048");
        assert_eq!(view.latitude, 43.27);
        assert_eq!(view.longitude, 5.39);
        assert_eq!(view.zoom, DEEP_LINK_ZOOM);
    }

    #[test]
    fn deep_link_without_coordinates_has_no_target() {
        let link = DeepLink::parse("?equipmentId=I1&sport=P%C3%A9tanque");
        assert_eq!(link.target(), None);
        assert_eq!(link.sport.as_deref(), Some("Pétanque"));
    }

    #[test]
    fn builds_share_and_report_links() {
        assert_eq!(
            share_url("https://sportmap.fr/", "I1", 43.5, 5.25),
            "https://sportmap.fr/map?equipmentId=I1&lat=43.5&lng=5.25&zoom=18"
        );
        assert_eq!(
            report_url("12", "City stade", 45.75, 4.85),
            "/report?equipmentId=12&equipmentName=City%20stade&lat=45.75&lng=4.85"
        );
    }

    #[test]
    fn websites_gain_a_scheme() {
        assert_eq!(external_url("www.club.fr"), "https://www.club.fr");
        assert_eq!(external_url("http://club.fr"), "http://club.fr");
    }

    #[test]
    fn sport_colors_cycle() {
        assert_eq!(sport_color(0), sport_color(10));
        assert_ne!(sport_color(0), sport_color(1));
    }
}
