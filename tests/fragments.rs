mod common;

use std::sync::{Arc, Mutex};

use bevy::math::DVec2;
use bevy::prelude::*;
use bevy_live_map::canvas::AsyncSender;
use bevy_live_map::fragment::{FragmentBatch, FragmentCaches, FragmentKey, RegionComponent};
use bevy_live_map::placement::ScreenGeometryComponent;
use bevy_live_map::{Async, CameraInput, FragmentProvider, LiveMapPlugin, MercatorProjection, QuadKey};
use geo::{Coord, MultiPolygon, Rect};

use common::{config, headless, run_until};

type Request = (Vec<FragmentKey>, AsyncSender<FragmentBatch>);

/// Holds every request until the test answers it.
#[derive(Clone, Default)]
struct DeferredProvider {
    requests: Arc<Mutex<Vec<Request>>>,
}

impl DeferredProvider {
    fn pending(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Answers the oldest request with a square inside each quad.
    fn answer_oldest(&self) -> Vec<FragmentKey> {
        let (keys, sender) = self.requests.lock().unwrap().remove(0);
        let batch = keys
            .iter()
            .map(|key| (key.clone(), inner_square(&key.quad_key)))
            .collect();
        sender.send(Ok(batch));
        keys
    }
}

impl FragmentProvider for DeferredProvider {
    fn fetch(&self, region_ids: &[String], quads: &[QuadKey], zoom_bucket: u8) -> Async<FragmentBatch> {
        let keys = region_ids
            .iter()
            .flat_map(|region| quads.iter().map(move |quad| FragmentKey::new(region.clone(), quad.clone(), zoom_bucket)))
            .collect();
        let (sender, response) = Async::channel();
        self.requests.lock().unwrap().push((keys, sender));
        response
    }
}

fn inner_square(quad: &QuadKey) -> MultiPolygon<f64> {
    let rect = quad.compute_rect(&MercatorProjection);
    let (dx, dy) = (rect.width() / 4.0, rect.height() / 4.0);
    let inner = Rect::new(
        Coord { x: rect.min().x + dx, y: rect.min().y + dy },
        Coord { x: rect.max().x - dx, y: rect.max().y - dy },
    );
    MultiPolygon(vec![inner.to_polygon()])
}

fn fragment_names(world: &mut World) -> Vec<String> {
    world
        .query::<&Name>()
        .iter(world)
        .map(|name| name.as_str().to_string())
        .filter(|name| name.starts_with("fragment_"))
        .collect()
}

#[test]
fn fragments_stream_into_the_region() {
    let provider = DeferredProvider::default();
    let mut app = headless(LiveMapPlugin::new(config(2.0)).with_fragments(provider.clone()));
    let region = app.world_mut().spawn(RegionComponent::new("r")).id();

    app.update();
    assert_eq!(provider.pending(), 1);
    let keys = provider.answer_oldest();
    assert_eq!(keys.len(), 4);

    let cached = run_until(&mut app, 20, |world| world.resource::<FragmentCaches>().cached.len() == 4);
    assert!(cached, "fragments never reached the cache");

    let caches = app.world().resource::<FragmentCaches>();
    assert!(caches.streaming.is_empty());
    assert!(caches.downloading.is_empty());
    let entities: Vec<Entity> = caches.cached.values().copied().collect();
    for entity in &entities {
        assert!(app.world().get::<ScreenGeometryComponent>(*entity).is_some());
    }

    app.update();
    let mut expected = entities;
    expected.sort();
    assert_eq!(app.world().get::<RegionComponent>(region).unwrap().fragments, expected);
    assert_eq!(fragment_names(app.world_mut()).len(), 4);
}

#[test]
fn fragments_arriving_for_invisible_quads_are_dropped() {
    let provider = DeferredProvider::default();
    let mut app = headless(LiveMapPlugin::new(config(2.0)).with_fragments(provider.clone()));
    app.world_mut().spawn(RegionComponent::new("r"));

    app.update();
    assert_eq!(provider.pending(), 1);

    // Far enough right that none of the first quads stays visible.
    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(-408.0, 0.0),
    });
    app.update();
    {
        let caches = app.world().resource::<FragmentCaches>();
        assert_eq!(caches.downloading.len(), 6, "in-flight keys are kept until they arrive");
    }

    let stale = provider.answer_oldest();
    for _ in 0..5 {
        app.update();
    }

    let caches = app.world().resource::<FragmentCaches>();
    for key in &stale {
        assert!(!caches.cached.contains_key(key), "{key} was cached");
        assert!(!caches.streaming.contains_key(key), "{key} was streamed");
        assert!(!caches.downloading.contains(key));
    }
    let names = fragment_names(app.world_mut());
    assert!(names.is_empty(), "unexpected fragment entities {names:?}");
}

#[test]
fn quads_without_geometry_are_remembered_as_empty() {
    let provider = DeferredProvider::default();
    let mut app = headless(LiveMapPlugin::new(config(2.0)).with_fragments(provider.clone()));
    app.world_mut().spawn(RegionComponent::new("r"));

    app.update();
    let (keys, sender) = provider.requests.lock().unwrap().remove(0);
    sender.send(Ok(Vec::new()));
    app.update();

    let caches = app.world().resource::<FragmentCaches>();
    assert_eq!(caches.empty.len(), keys.len());
    assert_eq!(caches.emitted.len(), keys.len());
    assert!(caches.cached.is_empty());

    app.update();
    assert_eq!(provider.pending(), 0, "empty fragments must not be requested again");
}
