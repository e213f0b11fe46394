//! Walks a node through the whole reboot lifecycle using only the public table.

use reboot_state::{
    derive_state, has_marker, transition_for, Actor, Annotations, RebootState, REBOOT_IN_PROGRESS,
    REBOOT_MARKERS, REBOOT_NOW, REBOOT_REQUESTED, TRANSITIONS,
};

fn step(annotations: &mut Annotations, actor: Actor) -> RebootState {
    let from = derive_state(annotations);
    let transition = transition_for(from, actor)
        .unwrap_or_else(|| panic!("{actor:?} has no edge out of {from}"));
    transition.apply(annotations);
    assert!(transition.lands_in_target(annotations));
    derive_state(annotations)
}

#[test]
fn test_full_cycle_returns_to_idle() {
    let mut annotations = Annotations::new();
    annotations.insert("node.kubernetes.io/exclude".to_string(), "true".to_string());

    assert_eq!(step(&mut annotations, Actor::External), RebootState::Requested);
    assert_eq!(step(&mut annotations, Actor::Controller), RebootState::Now);
    assert_eq!(step(&mut annotations, Actor::Agent), RebootState::InProgress);
    assert_eq!(step(&mut annotations, Actor::Agent), RebootState::Idle);

    for marker in REBOOT_MARKERS {
        assert!(!has_marker(&annotations, marker), "{marker} left behind");
    }
    assert_eq!(annotations.len(), 1);
}

#[test]
fn test_each_actor_owns_its_edges() {
    for transition in TRANSITIONS {
        for actor in [Actor::External, Actor::Controller, Actor::Agent] {
            let found = transition_for(transition.from, actor);
            if actor == transition.actor {
                assert_eq!(found, Some(transition));
            } else {
                assert_ne!(found, Some(transition));
            }
        }
    }
}

#[test]
fn test_unavailable_markers_count_once() {
    let mut annotations = Annotations::new();
    annotations.insert(REBOOT_NOW.to_string(), String::new());
    annotations.insert(REBOOT_IN_PROGRESS.to_string(), String::new());
    annotations.insert(REBOOT_REQUESTED.to_string(), String::new());

    let state = derive_state(&annotations);
    assert_eq!(state, RebootState::InProgress);
    assert!(state.is_unavailable());
}
