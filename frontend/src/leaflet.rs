use std::{cell::RefCell, rc::Rc};

use gloo_timers::callback::Timeout;
use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::{JsCast, prelude::*};
use web_sys::HtmlElement;

use crate::state::{ViewState, marker_style};

const MOVE_DEBOUNCE_MS: u32 = 300;
const CLUSTER_RADIUS: f64 = 35.0;
const CLUSTER_UNTIL_ZOOM: f64 = 15.0;
/// Zoom used when focusing a facility from a wider view.
const FOCUS_ZOOM: f64 = 15.0;

/// Point to draw on the map.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerSpec {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

pub struct MapHandle {
    map: JsValue,
    leaflet: JsValue,
    marker_layer: JsValue,
    markers: Vec<(String, JsValue)>,
    click_handlers: Vec<Closure<dyn FnMut()>>,
}

pub fn init_map(
    element: HtmlElement,
    view: ViewState,
    on_move: impl Fn(ViewState) + 'static,
    on_canvas_click: impl Fn() + 'static,
) -> Result<MapHandle, JsValue> {
    let leaflet = Reflect::get(&js_sys::global(), &JsValue::from_str("L"))?;
    if leaflet.is_undefined() {
        return Err(JsValue::from_str("Leaflet not loaded"));
    }

    let map = call_method(&leaflet, "map", &[element.into()])?;
    let tile_options = options(&[("maxZoom", JsValue::from_f64(19.0))]);
    Reflect::set(
        &tile_options,
        &JsValue::from_str("attribution"),
        &JsValue::from_str("© OpenStreetMap contributors"),
    )?;
    let tile_layer = call_method(
        &leaflet,
        "tileLayer",
        &[
            JsValue::from_str("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png"),
            tile_options.into(),
        ],
    )?;
    call_method(&tile_layer, "addTo", &[map.clone()])?;
    call_method(
        &map,
        "setView",
        &[lat_lng(view.latitude, view.longitude), JsValue::from_f64(view.zoom)],
    )?;

    let marker_layer = create_marker_layer(&leaflet)?;
    call_method(&marker_layer, "addTo", &[map.clone()])?;

    let on_move = Rc::new(on_move);
    let pending = Rc::new(RefCell::new(None::<Timeout>));
    let map_for_move = map.clone();
    let moveend = Closure::wrap(Box::new(move || {
        let map = map_for_move.clone();
        let on_move = on_move.clone();
        // replacing the timeout cancels the previous one
        *pending.borrow_mut() = Some(Timeout::new(MOVE_DEBOUNCE_MS, move || {
            if let Some(view) = current_view(&map) {
                on_move(view);
            }
        }));
    }) as Box<dyn FnMut()>);
    call_method(&map, "on", &[JsValue::from_str("moveend"), moveend.as_ref().clone()])?;
    moveend.forget();

    let click = Closure::wrap(Box::new(move || on_canvas_click()) as Box<dyn FnMut()>);
    call_method(&map, "on", &[JsValue::from_str("click"), click.as_ref().clone()])?;
    click.forget();

    Ok(MapHandle {
        map,
        leaflet,
        marker_layer,
        markers: Vec::new(),
        click_handlers: Vec::new(),
    })
}

/// Cluster group from `leaflet.markercluster` when the plugin is loaded.
fn create_marker_layer(leaflet: &JsValue) -> Result<JsValue, JsValue> {
    let cluster = Reflect::get(leaflet, &JsValue::from_str("markerClusterGroup"))?;
    if cluster.is_function() {
        let options = options(&[
            ("maxClusterRadius", JsValue::from_f64(CLUSTER_RADIUS)),
            ("disableClusteringAtZoom", JsValue::from_f64(CLUSTER_UNTIL_ZOOM)),
            ("showCoverageOnHover", JsValue::FALSE),
        ]);
        return call_method(leaflet, "markerClusterGroup", &[options.into()]);
    }
    web_sys::console::warn_1(&JsValue::from_str(
        "leaflet.markercluster missing, markers are not clustered",
    ));
    call_method(leaflet, "layerGroup", &[])
}

impl MapHandle {
    pub fn update_markers(
        &mut self,
        markers: &[MarkerSpec],
        selected: Option<&str>,
        on_select: Rc<dyn Fn(String)>,
    ) -> Result<(), JsValue> {
        call_method(&self.marker_layer, "clearLayers", &[])?;
        self.markers.clear();
        self.click_handlers.clear();

        let mut layers = Vec::with_capacity(markers.len());
        for spec in markers {
            let style = marker_style(selected, &spec.id);
            let options = options(&[
                ("radius", JsValue::from_f64(style.radius)),
                ("color", JsValue::from_str("#ffffff")),
                ("weight", JsValue::from_f64(2.0)),
                ("fillColor", JsValue::from_str(style.color)),
                ("fillOpacity", JsValue::from_f64(0.9)),
                ("className", JsValue::from_str(style.icon)),
                ("bubblingMouseEvents", JsValue::FALSE),
            ]);
            let marker = call_method(
                &self.leaflet,
                "circleMarker",
                &[lat_lng(spec.latitude, spec.longitude), options.into()],
            )?;
            call_method(&marker, "bindTooltip", &[JsValue::from_str(&spec.name)])?;

            let id = spec.id.clone();
            let on_select = on_select.clone();
            let handler = Closure::wrap(Box::new(move || on_select(id.clone())) as Box<dyn FnMut()>);
            call_method(&marker, "on", &[JsValue::from_str("click"), handler.as_ref().clone()])?;

            layers.push(marker.clone());
            self.markers.push((spec.id.clone(), marker));
            self.click_handlers.push(handler);
        }

        let layers = Array::from_iter(layers);
        if Reflect::get(&self.marker_layer, &JsValue::from_str("addLayers"))?.is_function() {
            call_method(&self.marker_layer, "addLayers", &[layers.into()])?;
        } else {
            for layer in layers.iter() {
                call_method(&self.marker_layer, "addLayer", &[layer])?;
            }
        }
        Ok(())
    }

    /// Reapplies [`marker_style`] to every marker after a selection change.
    pub fn restyle_markers(&self, selected: Option<&str>) -> Result<(), JsValue> {
        for (id, marker) in &self.markers {
            let style = marker_style(selected, id);
            let path = options(&[("fillColor", JsValue::from_str(style.color))]);
            call_method(marker, "setStyle", &[path.into()])?;
            call_method(marker, "setRadius", &[JsValue::from_f64(style.radius)])?;
            // detached while inside a cluster
            let element = call_method(marker, "getElement", &[])?;
            if let Some(element) = element.dyn_ref::<web_sys::Element>() {
                element.set_attribute("class", &format!("leaflet-interactive {}", style.icon))?;
            }
            if selected == Some(id.as_str()) {
                call_method(marker, "bringToFront", &[]).ok();
            }
        }
        Ok(())
    }

    pub fn set_view(&self, view: ViewState) -> Result<(), JsValue> {
        call_method(
            &self.map,
            "setView",
            &[lat_lng(view.latitude, view.longitude), JsValue::from_f64(view.zoom)],
        )?;
        Ok(())
    }

    /// Moves the camera so the facility sits `offset_px` above the centre,
    /// clear of the detail panel anchored below it.
    pub fn focus(&self, latitude: f64, longitude: f64, zoom: Option<f64>, offset_px: f64) -> Result<(), JsValue> {
        let current = call_method(&self.map, "getZoom", &[])?
            .as_f64()
            .unwrap_or(FOCUS_ZOOM);
        let zoom = zoom.unwrap_or_else(|| current.max(FOCUS_ZOOM));

        let point = call_method(
            &self.map,
            "project",
            &[lat_lng(latitude, longitude), JsValue::from_f64(zoom)],
        )?;
        let y = Reflect::get(&point, &JsValue::from_str("y"))?
            .as_f64()
            .unwrap_or_default();
        Reflect::set(&point, &JsValue::from_str("y"), &JsValue::from_f64(y + offset_px))?;
        let center = call_method(&self.map, "unproject", &[point, JsValue::from_f64(zoom)])?;

        let animate = options(&[("animate", JsValue::TRUE)]);
        call_method(
            &self.map,
            "setView",
            &[center, JsValue::from_f64(zoom), animate.into()],
        )?;
        Ok(())
    }
}

fn current_view(map: &JsValue) -> Option<ViewState> {
    let center = call_method(map, "getCenter", &[]).ok()?;
    Some(ViewState {
        latitude: Reflect::get(&center, &JsValue::from_str("lat")).ok()?.as_f64()?,
        longitude: Reflect::get(&center, &JsValue::from_str("lng")).ok()?.as_f64()?,
        zoom: call_method(map, "getZoom", &[]).ok()?.as_f64()?,
    })
}

fn options(entries: &[(&str, JsValue)]) -> Object {
    let object = Object::new();
    for (key, value) in entries {
        Reflect::set(&object, &JsValue::from_str(key), value).ok();
    }
    object
}

fn lat_lng(latitude: f64, longitude: f64) -> JsValue {
    Array::of2(&JsValue::from_f64(latitude), &JsValue::from_f64(longitude)).into()
}

fn call_method(target: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let function = Reflect::get(target, &JsValue::from_str(name))?;
    let function = function.dyn_into::<Function>()?;
    function.apply(target, &Array::from_iter(args.iter().cloned()))
}
