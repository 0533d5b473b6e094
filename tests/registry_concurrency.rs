use inputfeatures::device::catalog::{AnalogStick, ButtonState, DeviceButton, Direction, StickState};
use inputfeatures::{IoFeature, MappedFeatureRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const FEATURES: usize = 200;
const READERS: usize = 4;

fn buttons() -> Vec<Arc<DeviceButton>> {
    (0..FEATURES)
        .map(|i| DeviceButton::new(&format!("b{}", i)).unwrap())
        .collect()
}

#[test]
fn readers_never_observe_a_partial_registration() {
    let registry = MappedFeatureRegistry::new();
    let buttons = buttons();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let listed = registry.list();
                    // registration order is append-only, so every snapshot is a prefix
                    for (i, handle) in listed.iter().enumerate() {
                        assert_eq!(handle.id().as_str(), format!("b{}", i));
                    }
                    if let Some(last) = listed.last() {
                        let record = registry.lookup_id(last.id().as_str()).unwrap();
                        assert_eq!(record.id(), last.id());
                    }
                    let states = registry.iterate_states();
                    assert!(states.len() >= listed.len());
                    assert!(states.count() <= FEATURES);
                    assert!(registry.size() <= FEATURES);
                }
            });
        }

        s.spawn(|| {
            for button in &buttons {
                registry.register(button).unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    assert_eq!(registry.size(), FEATURES);
    for (button, handle) in buttons.iter().zip(registry.list()) {
        assert!(handle.is(button));
    }
}

#[test]
fn readers_see_update_pass_values_through_views() {
    let registry = MappedFeatureRegistry::new();
    let buttons = buttons();
    let pressed = Arc::new(AtomicBool::new(false));

    for button in &buttons {
        registry.register(button).unwrap();
        let pressed = pressed.clone();
        registry
            .map_fn(button, move |state: &ButtonState| {
                state.set_pressed(pressed.load(Ordering::Relaxed));
                Ok(())
            })
            .unwrap();
    }
    let views: Vec<_> = buttons
        .iter()
        .map(|button| registry.state(button).unwrap())
        .collect();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|| {
                let mut last_seen = vec![0; views.len()];
                while !done.load(Ordering::Acquire) {
                    for (view, last) in views.iter().zip(last_seen.iter_mut()) {
                        let presses = view.presses();
                        assert!(presses >= *last);
                        *last = presses;
                    }
                }
            });
        }

        s.spawn(|| {
            for tick in 0..500 {
                pressed.store(tick % 2 == 0, Ordering::Relaxed);
                registry.update_all().unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    for (button, view) in buttons.iter().zip(&views) {
        assert_eq!(view.presses(), 250, "presses of {}", button.id());
        let registration = registry.lookup(button).unwrap();
        assert!(registration.mapped);
    }
}

#[test]
fn readers_never_observe_a_torn_stick_position() {
    let registry = MappedFeatureRegistry::new();
    let stick = AnalogStick::new("ls").unwrap();
    registry.register(&stick).unwrap();
    let flip = Arc::new(AtomicBool::new(false));
    {
        let flip = flip.clone();
        registry
            .map_fn(&stick, move |state: &StickState| {
                if flip.load(Ordering::Relaxed) {
                    state.set(1.0, 1.0, -1.0);
                } else {
                    state.set(-1.0, -1.0, 0.0);
                }
                Ok(())
            })
            .unwrap();
    }
    let view = registry.state(&stick).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let position = view.position();
                    assert_eq!(position.x, position.y);
                    assert_eq!(position.is_clicked(), position.x > 0.0);
                    // held mask comes from the same reading, or from the previous pass
                    assert!(!(position.holds(Direction::Up) && position.holds(Direction::Down)));
                    assert!(!(position.holds(Direction::Left) && position.holds(Direction::Right)));
                }
            });
        }

        s.spawn(|| {
            for tick in 0..20_000 {
                flip.store(tick % 2 == 0, Ordering::Relaxed);
                registry.update_all().unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    let position = view.position();
    assert_eq!((position.x, position.y), (-1.0, -1.0));
    assert!(position.holds(Direction::Down));
    assert!(position.holds(Direction::Left));
}
