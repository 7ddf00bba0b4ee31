use school_map::{
    badge,
    capability::EventSource,
    config::DEFAULT_CENTER,
    record::parse_records,
    Coordinate, MapEvent, MapSession, SchoolRecord, SessionState, SvgMap,
};

const SCHOOLS: &str = include_str!("../data/schools.json");

fn mounted() -> MapSession<SvgMap> {
    let records = parse_records(SCHOOLS).unwrap();
    let mut session = MapSession::new(SvgMap::new());
    session.mount("map", records).unwrap();
    session.handle_event(MapEvent::Ready);
    session
}

#[test]
fn two_schools_end_to_end() {
    let records = vec![
        SchoolRecord::new("北京市十一学校", "第一梯队")
            .with_location(Coordinate::new(116.255328, 39.902167))
            .with_rate_2025("7.04%"),
        SchoolRecord::new("冷泉校区", "第八梯队")
            .with_location(Coordinate::UNSET)
            .with_rate_2025("218.2%"),
    ];
    let mut session = MapSession::new(SvgMap::new());
    session.mount("map", records).unwrap();
    assert_eq!(session.state(), SessionState::Loading);
    session.handle_event(MapEvent::Ready);
    assert_eq!(session.state(), SessionState::Ready);

    let pairs = session.registry().pairs();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].resolved.coordinate, Coordinate::new(116.255328, 39.902167));
    assert_eq!(pairs[0].resolved.badge.label(), "7.0");
    assert_eq!(pairs[1].resolved.coordinate, DEFAULT_CENTER);
    assert_eq!(pairs[1].resolved.badge.color().hex(), "#808080");
    assert_eq!(pairs[1].resolved.badge.label(), "218.2");
}

#[test]
fn dataset_renders_every_marker() {
    let session = mounted();
    assert_eq!(session.registry().len(), 5);

    let viewport = session.viewport().unwrap();
    let svg = session.map().render(viewport).unwrap();
    assert_eq!(svg.matches("<image ").count(), 5);
    assert!(svg.contains("人大附中西山学校"));
    assert!(!svg.contains("<foreignObject"));
    for pair in session.registry().pairs() {
        assert!(session.map().is_listening(EventSource::Marker(pair.marker)));
    }
}

#[test]
fn dataset_badges_follow_rate_rules() {
    let session = mounted();
    let labels: Vec<_> = session
        .registry()
        .pairs()
        .iter()
        .map(|p| p.resolved.badge.label().to_string())
        .collect();
    assert_eq!(labels, ["7.0", "58.5", "100.0", "40.5", "114.3"]);
    assert_eq!(badge::format_rate("100.00%"), "100");
}

#[test]
fn selection_switches_the_open_popup() {
    let mut session = mounted();
    let first = session.registry().pairs()[0].clone();
    let second = session.registry().pairs()[1].clone();

    session.handle_event(MapEvent::MarkerClick(first.marker));
    assert_eq!(session.map().open_popups(), vec![first.popup]);

    session.handle_event(MapEvent::MarkerClick(second.marker));
    assert_eq!(session.map().open_popups(), vec![second.popup]);

    let svg = session.map().render(session.viewport().unwrap()).unwrap();
    assert_eq!(svg.matches("<foreignObject").count(), 1);
    assert!(svg.contains("马连洼南路9号"));
}

#[test]
fn record_change_rebuilds_from_scratch() {
    let mut session = mounted();
    let viewport = session.viewport().unwrap();
    let mut records = parse_records(SCHOOLS).unwrap();
    records.truncate(2);
    session.set_records(records);
    assert_eq!(session.registry().len(), 2);
    assert_eq!(session.map().markers_on(viewport).len(), 2);
}

#[test]
fn repeated_rebuilds_free_old_markers() {
    let mut session = mounted();
    let records = parse_records(SCHOOLS).unwrap();
    for _ in 0..100 {
        session.set_records(records.clone());
    }
    assert_eq!(session.registry().len(), 5);
    assert_eq!(session.map().object_count(), (5, 5));

    session.unmount();
    assert_eq!(session.map().object_count(), (0, 0));
}

#[test]
fn unmount_is_complete_and_repeatable() {
    let mut session = mounted();
    let pair = session.registry().pairs()[0].clone();
    session.handle_event(MapEvent::MarkerClick(pair.marker));

    session.unmount();
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(session.registry().is_empty());
    assert_eq!(session.map().viewport_count(), 0);
    assert!(!session.map().sdk_loaded());
    assert!(session.map().open_popups().is_empty());
    assert!(!session.map().is_listening(EventSource::Marker(pair.marker)));

    session.unmount();
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[test]
fn empty_set_creates_no_viewport() {
    let mut session = MapSession::new(SvgMap::new());
    session.mount("map", Vec::new()).unwrap();
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.map().viewport_count(), 0);
    assert!(!session.map().sdk_loaded());
}
