use super::*;

#[test]
fn writes_one_tagged_json_line_per_action() {
    let sink = JsonLinesSink::new(Vec::new());

    sink.set_badge_count(3);
    sink.launch_call_ui(&CallLaunch {
        caller_name: "bob".into(),
        room_name: "r1".into(),
    });
    sink.cancel_ringing(None);

    let written = String::from_utf8(sink.into_inner()).expect("utf8");
    let lines: Vec<Value> = written
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["type"], "set_badge_count");
    assert_eq!(lines[0]["payload"]["count"], 3);
    assert_eq!(lines[1]["type"], "launch_call_ui");
    assert_eq!(lines[1]["payload"]["roomName"], "r1");
    assert_eq!(lines[2]["type"], "cancel_ringing");
}
