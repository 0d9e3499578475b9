use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::{JsCast, prelude::*};
use yew::prelude::*;

mod account;
mod api;
mod leaflet;
mod report;
mod session;
pub mod state;

use account::{ForgotPasswordPage, RegisterPage, ResetPasswordPage, VerificationPage};
use report::{ReportPage, ReportTarget};
use state::{DeepLink, MapUiState, Overlay, Route, SearchState, ViewState, Viewport};

const LOAD_ERROR: &str = "Erreur de chargement des données de la carte";

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

impl FeatureCollection {
    fn find(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.id() == id)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct Feature {
    geometry: Geometry,
    properties: FacilityProperties,
}

impl Feature {
    fn id(&self) -> &str {
        self.properties.id.as_deref().unwrap_or_default()
    }

    fn longitude(&self) -> f64 {
        self.geometry.coordinates[0]
    }

    fn latitude(&self) -> f64 {
        self.geometry.coordinates[1]
    }

    fn name(&self) -> String {
        self.properties.name.clone().unwrap_or_default()
    }

    /// Report links carry the database id when the server knows it.
    fn report_id(&self) -> String {
        self.properties
            .db_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.id().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct Geometry {
    coordinates: [f64; 2],
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct FacilityProperties {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    db_id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    sports: Vec<String>,
    #[serde(default)]
    free_access: Value,
    #[serde(default)]
    inst_acc_handi_bool: Value,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    gestion: Option<String>,
}

impl FacilityProperties {
    fn free_access_label(&self) -> Option<&'static str> {
        let free = match &self.free_access {
            Value::Bool(flag) => *flag,
            Value::String(text) if !text.trim().is_empty() => {
                let text = text.trim();
                text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("oui")
            }
            _ => return None,
        };
        Some(if free { "Oui" } else { "Non" })
    }

    fn accessible_label(&self) -> Option<&'static str> {
        self.inst_acc_handi_bool
            .as_bool()
            .map(|flag| if flag { "Oui" } else { "Non" })
    }
}

type ResultsState = state::Results<FeatureCollection>;

enum ResultsAction {
    Request(state::FacilityQuery),
    Loaded(state::FacilityQuery, FeatureCollection),
    Failed(state::FacilityQuery, String),
}

impl Reducible for ResultsState {
    type Action = ResultsAction;

    fn reduce(self: Rc<Self>, action: ResultsAction) -> Rc<Self> {
        let mut next = (*self).clone();
        match action {
            ResultsAction::Request(query) => next.request(query),
            ResultsAction::Loaded(query, collection) => next.receive(&query, collection),
            ResultsAction::Failed(query, error) => next.fail(&query, error),
        }
        next.into()
    }
}

enum MapAction {
    MarkerClicked(String),
    CanvasClicked,
    Close,
    Toggle(Overlay),
}

impl Reducible for MapUiState {
    type Action = MapAction;

    fn reduce(self: Rc<Self>, action: MapAction) -> Rc<Self> {
        let mut next = (*self).clone();
        match action {
            MapAction::MarkerClicked(id) => next.marker_clicked(&id),
            MapAction::CanvasClicked => next.canvas_clicked(),
            MapAction::Close => next.close(),
            MapAction::Toggle(overlay) => next.toggle(overlay),
        }
        next.into()
    }
}

enum SearchAction {
    Query(String),
    Suggestions { query: String, sports: Vec<String> },
    Select(String),
    Remove(String),
    FreeAccess(bool),
    Accessible(bool),
}

impl Reducible for SearchState {
    type Action = SearchAction;

    fn reduce(self: Rc<Self>, action: SearchAction) -> Rc<Self> {
        let mut next = (*self).clone();
        match action {
            SearchAction::Query(query) => next.set_query(&query),
            SearchAction::Suggestions { query, sports } => next.receive_suggestions(&query, sports),
            SearchAction::Select(sport) => next.select_suggestion(&sport),
            SearchAction::Remove(sport) => next.remove_filter(&sport),
            SearchAction::FreeAccess(flag) => next.free_access_only = flag,
            SearchAction::Accessible(flag) => next.accessible_only = flag,
        }
        next.into()
    }
}

#[wasm_bindgen(start)]
pub fn start() {
    yew::Renderer::<App>::new().render();
}

#[function_component(App)]
fn app() -> Html {
    let location = web_sys::window().map(|window| window.location());
    let path = location
        .as_ref()
        .and_then(|location| location.pathname().ok())
        .unwrap_or_default();
    let search = location
        .as_ref()
        .and_then(|location| location.search().ok())
        .unwrap_or_default();

    match Route::parse(&path, &search) {
        Route::Report => html! { <ReportPage target={ReportTarget::from_search(&search)} /> },
        Route::Register => html! { <RegisterPage /> },
        Route::Verification { email } => html! { <VerificationPage {email} /> },
        Route::ForgotPassword => html! { <ForgotPasswordPage /> },
        Route::ResetPassword { token } => html! { <ResetPasswordPage {token} /> },
        Route::Map => html! { <MapPage deep_link={DeepLink::parse(&search)} /> },
    }
}

#[derive(Properties, PartialEq)]
struct MapPageProps {
    deep_link: DeepLink,
}

#[function_component(MapPage)]
fn map_page(props: &MapPageProps) -> Html {
    let ui = use_reducer(MapUiState::default);
    let search = use_reducer(SearchState::default);
    let results = use_reducer(ResultsState::default);
    let sports = use_state(Vec::<String>::new);
    let session = use_state(session::load);
    let map_ref = use_node_ref();
    let map_handle = use_mut_ref(|| None::<leaflet::MapHandle>);
    let view = use_mut_ref(ViewState::default);
    let pending_zoom = use_mut_ref(|| None::<f64>);
    let deep_link_applied = use_mut_ref(|| false);

    {
        let map_ref = map_ref.clone();
        let map_handle = map_handle.clone();
        let view = view.clone();
        let ui = ui.clone();
        use_effect_with((), move |_| {
            if let Some(element) = map_ref.cast::<web_sys::HtmlElement>() {
                let initial = *view.borrow();
                let on_move = move |next: ViewState| *view.borrow_mut() = next;
                let on_canvas_click = move || ui.dispatch(MapAction::CanvasClicked);
                match leaflet::init_map(element, initial, on_move, on_canvas_click) {
                    Ok(handle) => *map_handle.borrow_mut() = Some(handle),
                    Err(err) => web_sys::console::error_2(&JsValue::from_str("map init failed"), &err),
                }
            }
            || ()
        });
    }

    {
        let sports = sports.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                match api::get_json::<Vec<String>>("/api/sports").await {
                    Ok(list) => sports.set(list),
                    Err(err) => web_sys::console::warn_1(&JsValue::from_str(&err)),
                }
            });
            || ()
        });
    }

    {
        let results = results.clone();
        use_effect_with(search.to_query(), move |query| {
            fetch_facilities(query.clone(), results);
            || ()
        });
    }

    {
        let search = search.clone();
        let query = search.suggestion_query().map(str::to_string);
        use_effect_with(query, move |query| {
            if let Some(query) = query.clone() {
                wasm_bindgen_futures::spawn_local(async move {
                    let url = format!("/api/sports/suggestions?q={}", urlencoding::encode(&query));
                    if let Ok(sports) = api::get_json::<Vec<String>>(&url).await {
                        search.dispatch(SearchAction::Suggestions { query, sports });
                    }
                });
            }
            || ()
        });
    }

    {
        let map_handle = map_handle.clone();
        let ui = ui.clone();
        let collection = results.collection.clone();
        let selected = ui.selected().map(str::to_string);
        use_effect_with(collection, move |collection| {
            if let (Some(handle), Some(collection)) = (map_handle.borrow_mut().as_mut(), collection) {
                let markers: Vec<leaflet::MarkerSpec> = collection
                    .features
                    .iter()
                    .map(|feature| leaflet::MarkerSpec {
                        id: feature.id().to_string(),
                        latitude: feature.latitude(),
                        longitude: feature.longitude(),
                        name: feature.name(),
                    })
                    .collect();
                let on_select: Rc<dyn Fn(String)> =
                    Rc::new(move |id: String| ui.dispatch(MapAction::MarkerClicked(id)));
                if let Err(err) = handle.update_markers(&markers, selected.as_deref(), on_select) {
                    web_sys::console::error_1(&err);
                }
            }
            || ()
        });
    }

    {
        let map_handle = map_handle.clone();
        let pending_zoom = pending_zoom.clone();
        let collection = results.collection.clone();
        let selected = ui.selected().map(str::to_string);
        use_effect_with(selected, move |selected| {
            if let Some(handle) = map_handle.borrow().as_ref() {
                if let Err(err) = handle.restyle_markers(selected.as_deref()) {
                    web_sys::console::error_1(&err);
                }
                let facility = selected
                    .as_deref()
                    .zip(collection.as_ref())
                    .and_then(|(id, collection)| collection.find(id));
                if let Some(facility) = facility {
                    let zoom = pending_zoom.borrow_mut().take();
                    let offset = Viewport::from_width(window_width()).pan_offset();
                    if let Err(err) = handle.focus(facility.latitude(), facility.longitude(), zoom, offset) {
                        web_sys::console::error_1(&err);
                    }
                }
            }
            || ()
        });
    }

    {
        let deep_link = props.deep_link.clone();
        let ui = ui.clone();
        let map_handle = map_handle.clone();
        let collection = results.collection.clone();
        use_effect_with(collection, move |collection| {
            if let Some(collection) = collection.as_ref().filter(|_| !*deep_link_applied.borrow()) {
                *deep_link_applied.borrow_mut() = true;
                if let Some((id, target)) = deep_link.target() {
                    if collection.find(id).is_some() {
                        if let Some(handle) = map_handle.borrow().as_ref() {
                            handle.set_view(target).ok();
                        }
                        *pending_zoom.borrow_mut() = Some(target.zoom);
                        ui.dispatch(MapAction::MarkerClicked(id.to_string()));
                    }
                }
            }
            || ()
        });
    }

    {
        let linked_sport = props.deep_link.sport.clone();
        let search = search.clone();
        use_effect_with((*sports).clone(), move |known_sports| {
            if let Some(sport) = linked_sport.filter(|sport| known_sports.contains(sport)) {
                search.dispatch(SearchAction::Select(sport));
            }
            || ()
        });
    }

    let on_query = {
        let search = search.clone();
        Callback::from(move |event: InputEvent| {
            if let Some(input) = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::HtmlInputElement>().ok())
            {
                search.dispatch(SearchAction::Query(input.value()));
            }
        })
    };

    let toggle = |overlay: Overlay| {
        let ui = ui.clone();
        Callback::from(move |_: MouseEvent| ui.dispatch(MapAction::Toggle(overlay.clone())))
    };
    let close = {
        let ui = ui.clone();
        Callback::from(move |_: MouseEvent| ui.dispatch(MapAction::Close))
    };

    let detail = ui
        .selected()
        .zip(results.collection.as_ref())
        .and_then(|(id, collection)| collection.find(id).cloned());

    html! {
        <div class="app">
            <div id="map" ref={map_ref}></div>
            <div class="search-bar">
                <button class="icon-button" onclick={toggle(Overlay::Nav)}>{"☰"}</button>
                <input
                    type="search"
                    placeholder="Rechercher un sport"
                    value={search.query.clone()}
                    oninput={on_query}
                />
                <button class="icon-button" onclick={toggle(Overlay::Sports)}>{"Sports"}</button>
                <button class="icon-button" onclick={toggle(Overlay::Filters)}>{"Filtres"}</button>
            </div>
            {render_suggestions(&search)}
            {render_active_filters(&search)}
            {render_status(&results)}
            {
                match &ui.overlay {
                    Overlay::None => html! {},
                    Overlay::Filters => render_filters(&search, close.clone()),
                    Overlay::Sports => render_sports(&sports, &search, close.clone()),
                    Overlay::Nav => html! { <NavPanel session={session.clone()} on_close={close.clone()} /> },
                    Overlay::Detail(_) => match detail {
                        Some(feature) => render_detail(&feature, close.clone()),
                        None => html! {},
                    },
                }
            }
        </div>
    }
}

fn render_status(results: &ResultsState) -> Html {
    if let Some(message) = results.error.as_ref() {
        return html! { <div class="warning floating">{message.clone()}</div> };
    }
    if results.loading && results.collection.is_none() {
        return html! { <div class="spinner" aria-label="Chargement"></div> };
    }
    html! {}
}

fn render_suggestions(search: &UseReducerHandle<SearchState>) -> Html {
    if search.suggestions.is_empty() {
        return html! {};
    }
    html! {
        <ul class="suggestions">
            { for search.suggestions.iter().map(|sport| {
                let search = search.clone();
                let sport = sport.clone();
                let label = sport.clone();
                let onclick = Callback::from(move |_: MouseEvent| search.dispatch(SearchAction::Select(sport.clone())));
                html! { <li {onclick}>{label}</li> }
            }) }
        </ul>
    }
}

fn render_active_filters(search: &UseReducerHandle<SearchState>) -> Html {
    if search.active_filters.is_empty() {
        return html! {};
    }
    html! {
        <div class="active-filters">
            { for search.active_filters.iter().map(|sport| {
                let search = search.clone();
                let sport = sport.clone();
                let label = sport.clone();
                let onclick = Callback::from(move |_: MouseEvent| search.dispatch(SearchAction::Remove(sport.clone())));
                html! { <span class="chip">{label}<button {onclick}>{"×"}</button></span> }
            }) }
        </div>
    }
}

fn render_filters(search: &UseReducerHandle<SearchState>, on_close: Callback<MouseEvent>) -> Html {
    let toggle_free = {
        let search = search.clone();
        let flag = !search.free_access_only;
        Callback::from(move |_: MouseEvent| search.dispatch(SearchAction::FreeAccess(flag)))
    };
    let toggle_accessible = {
        let search = search.clone();
        let flag = !search.accessible_only;
        Callback::from(move |_: MouseEvent| search.dispatch(SearchAction::Accessible(flag)))
    };
    let switch = |on: bool| if on { "switch on" } else { "switch" };

    html! {
        <div class="sheet">
            <header>
                <h3>{"Filtres"}</h3>
                <button class="close" onclick={on_close}>{"×"}</button>
            </header>
            <div class="filter-row">
                <span>{"Libre accès"}</span>
                <button class={switch(search.free_access_only)} onclick={toggle_free}>
                    { if search.free_access_only { "On" } else { "Off" } }
                </button>
            </div>
            <hr />
            <div class="filter-row">
                <span>{"Accès handicapé"}</span>
                <button class={switch(search.accessible_only)} onclick={toggle_accessible}>
                    { if search.accessible_only { "On" } else { "Off" } }
                </button>
            </div>
        </div>
    }
}

fn render_sports(
    sports: &[String],
    search: &UseReducerHandle<SearchState>,
    on_close: Callback<MouseEvent>,
) -> Html {
    html! {
        <div class="sheet">
            <header>
                <h3>{"Sports"}</h3>
                <button class="close" onclick={on_close}>{"×"}</button>
            </header>
            <div class="sport-list">
                { for sports.iter().enumerate().map(|(index, sport)| {
                    let active = search.active_filters.contains(sport);
                    let search = search.clone();
                    let sport = sport.clone();
                    let label = sport.clone();
                    let onclick = Callback::from(move |_: MouseEvent| {
                        if active {
                            search.dispatch(SearchAction::Remove(sport.clone()));
                        } else {
                            search.dispatch(SearchAction::Select(sport.clone()));
                        }
                    });
                    let style = format!("background: {}", state::sport_color(index));
                    html! {
                        <button class={classes!("chip", active.then_some("active"))} {style} {onclick}>{label}</button>
                    }
                }) }
            </div>
        </div>
    }
}

fn render_detail(feature: &Feature, on_close: Callback<MouseEvent>) -> Html {
    let properties = &feature.properties;
    let origin = web_sys::window()
        .and_then(|window| window.location().origin().ok())
        .unwrap_or_default();
    let share = state::share_url(&origin, feature.id(), feature.latitude(), feature.longitude());
    let report = state::report_url(
        &feature.report_id(),
        &feature.name(),
        feature.latitude(),
        feature.longitude(),
    );

    let kind = match (&properties.family, &properties.kind) {
        (Some(family), Some(kind)) if family != kind => html! {
            <>
                <p class="family">{family.clone()}</p>
                <p class="kind">{kind.clone()}</p>
            </>
        },
        (Some(family), _) => html! { <p class="family">{family.clone()}</p> },
        (None, Some(kind)) => html! { <p class="kind">{kind.clone()}</p> },
        (None, None) => html! {},
    };

    let row = |label: &str, value: Option<String>| match value.filter(|value| !value.trim().is_empty()) {
        Some(value) => html! { <div class="row"><dt>{label.to_string()}</dt><dd>{value}</dd></div> },
        None => html! {},
    };
    let address = properties.address.clone().map(|address| match properties.city.as_ref() {
        Some(city) => format!("{address}, {city}"),
        None => address,
    });

    html! {
        <div class="detail-panel">
            <header>
                <h2>{feature.name()}</h2>
                <a class="icon-button" href={share} title="Partager">{"⤴"}</a>
                <button class="close" onclick={on_close}>{"×"}</button>
            </header>
            {kind}
            if !properties.sports.is_empty() {
                <div class="sports">
                    <p class="label">{"Sport pratiqué :"}</p>
                    { for properties.sports.iter().enumerate().map(|(index, sport)| {
                        let style = format!("background: {}", state::sport_color(index));
                        html! { <span class="chip" {style}>{sport.clone()}</span> }
                    }) }
                </div>
            }
            <dl>
                {row("Accès libre :", properties.free_access_label().map(str::to_string))}
                {row("Accès handicapé :", properties.accessible_label().map(str::to_string))}
                {row("Adresse :", address)}
                {row("Propriétaire :", properties.owner.clone())}
                {row("Gestionnaire :", properties.gestion.clone())}
            </dl>
            if let Some(url) = properties.url.clone().filter(|url| !url.trim().is_empty()) {
                <a class="website" href={state::external_url(&url)} target="_blank" rel="noopener noreferrer">{url}</a>
            }
            <a class="report-link" href={report}>{"Signaler un problème"}</a>
        </div>
    }
}

#[derive(Serialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Properties, PartialEq)]
struct NavPanelProps {
    session: UseStateHandle<Option<session::Session>>,
    on_close: Callback<MouseEvent>,
}

#[function_component(NavPanel)]
fn nav_panel(props: &NavPanelProps) -> Html {
    let email = use_state(String::new);
    let password = use_state(String::new);
    let error = use_state(|| None::<String>);
    let sending = use_state(|| false);

    let on_logout = {
        let session_state = props.session.clone();
        Callback::from(move |_: MouseEvent| {
            session::clear();
            session_state.set(None);
        })
    };

    let on_submit = {
        let session_state = props.session.clone();
        let email = email.clone();
        let password = password.clone();
        let error = error.clone();
        let sending = sending.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            let credentials = Credentials {
                email: (*email).clone(),
                password: (*password).clone(),
            };
            let session_state = session_state.clone();
            let error = error.clone();
            let sending = sending.clone();
            sending.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                let result =
                    api::post_json::<_, session::AuthResponse>("/api/auth/login", &credentials, None).await;
                sending.set(false);
                match result {
                    Ok(response) => {
                        error.set(None);
                        session_state.set(Some(session::save(&response)));
                    }
                    Err(message) => error.set(Some(message)),
                }
            });
        })
    };

    let body = match props.session.as_ref() {
        Some(current) => {
            let name = current
                .user
                .as_ref()
                .map(|user| user.name.clone().unwrap_or_else(|| user.username.clone()))
                .unwrap_or_default();
            html! {
                <div class="account">
                    <p>{format!("Connecté : {name}")}</p>
                    <button onclick={on_logout}>{"Se déconnecter"}</button>
                </div>
            }
        }
        None => html! {
            <form class="login" onsubmit={on_submit}>
                <input type="email" placeholder="Email" value={(*email).clone()} oninput={text_input(email.clone())} />
                <input type="password" placeholder="Mot de passe" value={(*password).clone()} oninput={text_input(password.clone())} />
                if let Some(message) = (*error).clone() {
                    <div class="warning">{message}</div>
                }
                <button type="submit" disabled={*sending}>{"Se connecter"}</button>
                <a href="/forgot-password">{"Mot de passe oublié ?"}</a>
                <a href="/register">{"Créer un compte"}</a>
            </form>
        },
    };

    html! {
        <nav class="nav-panel">
            <header>
                <h3>{"SportMap"}</h3>
                <button class="close" onclick={props.on_close.clone()}>{"×"}</button>
            </header>
            {body}
            <a href="/map">{"Carte"}</a>
        </nav>
    }
}

fn text_input(state: UseStateHandle<String>) -> Callback<InputEvent> {
    Callback::from(move |event: InputEvent| {
        if let Some(input) = event
            .target()
            .and_then(|target| target.dyn_into::<web_sys::HtmlInputElement>().ok())
        {
            state.set(input.value());
        }
    })
}

fn window_width() -> f64 {
    web_sys::window()
        .and_then(|window| window.inner_width().ok())
        .and_then(|width| width.as_f64())
        .unwrap_or(1024.0)
}

fn fetch_facilities(query: state::FacilityQuery, results: UseReducerHandle<ResultsState>) {
    results.dispatch(ResultsAction::Request(query.clone()));
    wasm_bindgen_futures::spawn_local(async move {
        match api::post_json::<_, FeatureCollection>("/api/facilities/search", &query, None).await {
            Ok(collection) => results.dispatch(ResultsAction::Loaded(query, collection)),
            Err(err) => {
                web_sys::console::error_1(&JsValue::from_str(&err));
                results.dispatch(ResultsAction::Failed(query, LOAD_ERROR.to_string()));
            }
        }
    });
}
