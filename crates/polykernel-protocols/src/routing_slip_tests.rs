use super::*;

fn uris(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| entry.to_string()).collect()
}

#[test]
fn command_slip_records_arrival_then_departure() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://local/csharp").unwrap();
    slip.stamp("kernel://local/csharp").unwrap();
    assert_eq!(
        slip.entries(),
        [
            "kernel://local/csharp?tag=arrived",
            "kernel://local/csharp"
        ]
    );
}

#[test]
fn duplicate_arrival_is_rejected() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://local/csharp").unwrap();
    let error = slip.stamp_as_arrived("kernel://local/csharp").unwrap_err();
    assert!(matches!(error, RoutingSlipError::AlreadyInSlip { .. }));
}

#[test]
fn departure_without_arrival_is_rejected() {
    let mut slip = CommandRoutingSlip::new();
    let error = slip.stamp("kernel://local/csharp").unwrap_err();
    assert!(matches!(error, RoutingSlipError::NotInSlip { .. }));
}

#[test]
fn duplicate_departure_is_rejected() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://local/csharp").unwrap();
    slip.stamp("kernel://local/csharp").unwrap();
    let error = slip.stamp("kernel://local/csharp").unwrap_err();
    assert!(matches!(error, RoutingSlipError::AlreadyInSlip { .. }));
}

#[test]
fn arrival_comparison_ignores_the_tag_when_asked() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://local/csharp").unwrap();
    assert!(slip.contains("kernel://local/csharp", true));
    assert!(!slip.contains("kernel://local/csharp", false));
    assert!(slip.contains("kernel://local/csharp?tag=arrived", false));
}

#[test]
fn continuation_appends_only_the_suffix_beyond_a_shared_prefix() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://remote/a").unwrap();
    slip.stamp("kernel://remote/a").unwrap();

    // The peer traveled the same two hops and then two more.
    slip.continue_with(&uris(&[
        "kernel://remote/a?tag=arrived",
        "kernel://remote/a",
        "kernel://remote/b?tag=arrived",
        "kernel://remote/b",
    ]))
    .unwrap();

    assert_eq!(slip.len(), 4);
    assert_eq!(slip.entries()[2], "kernel://remote/b?tag=arrived");
    assert_eq!(slip.entries()[3], "kernel://remote/b");
}

#[test]
fn continuation_conflict_names_the_offending_uri() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://remote/a").unwrap();

    // Not a prefix relationship, and the arrived stamp is already present.
    let error = slip
        .continue_with(&uris(&[
            "kernel://remote/b?tag=arrived",
            "kernel://remote/a?tag=arrived",
        ]))
        .unwrap_err();
    assert!(matches!(error, RoutingSlipError::CannotContinue { .. }));
    assert!(error.to_string().contains("kernel://remote/a?tag=arrived"));
}

#[test]
fn continuation_deduplicates_its_input() {
    let mut slip = CommandRoutingSlip::new();
    slip.continue_with(&uris(&[
        "kernel://remote/a?tag=arrived",
        "kernel://remote/a?tag=arrived",
        "kernel://remote/a",
    ]))
    .unwrap();
    assert_eq!(slip.len(), 2);
}

#[test]
fn starts_with_compares_bare_uris_positionally() {
    let mut slip = CommandRoutingSlip::new();
    slip.stamp_as_arrived("kernel://local/a").unwrap();
    slip.stamp("kernel://local/a").unwrap();

    assert!(slip.starts_with(&uris(&["kernel://local/a?tag=arrived"])));
    assert!(slip.starts_with(&uris(&["kernel://local/a", "kernel://local/a"])));
    assert!(!slip.starts_with(&[]));
    assert!(!slip.starts_with(&uris(&[
        "kernel://local/a",
        "kernel://local/a",
        "kernel://local/b"
    ])));
}

#[test]
fn event_slip_takes_a_single_stamp_per_hop() {
    let mut slip = EventRoutingSlip::new();
    slip.stamp("kernel://local/csharp").unwrap();
    let error = slip.stamp("kernel://local/csharp").unwrap_err();
    assert!(matches!(error, RoutingSlipError::AlreadyInSlip { .. }));
    assert_eq!(slip.entries(), ["kernel://local/csharp"]);
}

#[test]
fn event_slip_distinguishes_tagged_and_bare_entries() {
    let mut slip = EventRoutingSlip::new();
    slip.stamp("kernel://local/csharp?tag=arrived").unwrap();
    slip.stamp("kernel://local/csharp").unwrap();
    assert_eq!(slip.len(), 2);
}

#[test]
fn event_continuation_extends_an_existing_slip() {
    let mut slip = EventRoutingSlip::new();
    slip.stamp("kernel://remote/x").unwrap();
    slip.continue_with(&uris(&["kernel://remote/x", "kernel://remote/y"]))
        .unwrap();
    assert_eq!(slip.entries(), ["kernel://remote/x", "kernel://remote/y"]);
}

#[test]
fn continuation_length_is_the_longer_of_the_two_slips() {
    let mut slip = EventRoutingSlip::new();
    slip.stamp("kernel://remote/x").unwrap();
    slip.stamp("kernel://remote/y").unwrap();
    slip.continue_with(&uris(&["kernel://remote/x", "kernel://remote/y"]))
        .unwrap();
    assert_eq!(slip.len(), 2);

    slip.continue_with(&uris(&[
        "kernel://remote/x",
        "kernel://remote/y",
        "kernel://remote/z",
    ]))
    .unwrap();
    assert_eq!(slip.len(), 3);
}

#[test]
fn wire_entries_are_trusted_as_stamped() {
    let slip = CommandRoutingSlip::from_entries(uris(&[
        "kernel://remote/a?tag=arrived",
        "kernel://remote/a",
    ]));
    assert!(slip.contains("kernel://remote/a", false));
    assert!(slip.contains("kernel://remote/a?tag=arrived", false));
}
