use costpull_config::{AnchorMatch, GsheetConfig};
use costpull_recon::{ReportMonth, SheetCell, SheetTable};
use costpull_sheets::{sync_table, BlockOrigin, GoogleSheetsClient, SheetReply, SheetRequest, SheetsError, SpreadsheetApi};
use httpmock::prelude::*;
use serde_json::json;

fn metadata_body() -> serde_json::Value {
    json!({
        "spreadsheetId": "ss",
        "sheets": [
            { "properties": { "sheetId": 0, "title": "Main",
                "gridProperties": { "rowCount": 20, "columnCount": 4 } } },
            { "properties": { "sheetId": 12, "title": "Template",
                "gridProperties": { "rowCount": 100, "columnCount": 9 } } }
        ]
    })
}

#[test]
fn metadata_requests_only_sheet_properties() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v4/spreadsheets/ss")
            .query_param(
                "fields",
                "spreadsheetId,sheets/properties(gridProperties(columnCount,rowCount),sheetId,title)",
            )
            .header("authorization", "Bearer tok");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(metadata_body());
    });

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    let meta = client.metadata().unwrap();

    mock.assert();
    assert_eq!(meta.tabs.len(), 2);
    assert_eq!(meta.tab("Template").unwrap().sheet_id, 12);
    assert_eq!(meta.tab("Main").unwrap().column_count, 4);
}

#[test]
fn read_values_returns_strings() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path_includes("/v4/spreadsheets/ss/values/");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "range": "Main!A1:D20", "majorDimension": "ROWS",
                "values": [["Report"], ["", "Raw 2024-08"]] }));
    });

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    let values = client.read_values("Main!A1:D20").unwrap();
    assert_eq!(values[1][1], "Raw 2024-08");
}

#[test]
fn batch_update_parses_new_sheet() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/ss:batchUpdate")
            .body_includes("\"addSheet\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "spreadsheetId": "ss", "replies": [ { "addSheet": { "properties": {
                "sheetId": 42, "title": "Raw", "index": 2,
                "gridProperties": { "rowCount": 3, "columnCount": 9 } } } } ] }));
    });

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    let replies = client
        .batch_update(&[SheetRequest::AddTab {
            title: "Raw".into(),
            index: 2,
            rows: 3,
            columns: 9,
            hidden: true,
        }])
        .unwrap();

    mock.assert();
    match &replies[0] {
        SheetReply::TabCreated(tab) => assert_eq!(tab.sheet_id, 42),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn forbidden_maps_to_unauthorized() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v4/spreadsheets/ss");
        then.status(403)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 403, "message": "The caller does not have permission" } }));
    });

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    let err = client.metadata().unwrap_err();
    assert!(err.is_auth());
    assert!(err.to_string().contains("does not have permission"));
}

#[test]
fn server_error_maps_to_api() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v4/spreadsheets/ss");
        then.status(500).body("boom");
    });

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    match client.metadata().unwrap_err() {
        SheetsError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn full_sync_against_mock_api() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v4/spreadsheets/ss");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(metadata_body());
    });
    server.mock(|when, then| {
        when.method(GET).path_includes("/values/");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "values": [["Costs for Raw 2024-08"]] }));
    });
    let duplicate = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/ss:batchUpdate")
            .body_includes("\"duplicateSheet\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "replies": [ { "duplicateSheet": { "properties": {
                "sheetId": 99, "title": "Raw 2024-08",
                "gridProperties": { "rowCount": 100, "columnCount": 9 } } } } ] }));
    });
    let write = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/ss:batchUpdate")
            .body_includes("\"updateCells\"")
            .body_includes("\"copyPaste\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "replies": [{}, {}] }));
    });
    let resize = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/ss:batchUpdate")
            .body_includes("\"autoResizeDimensions\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "replies": [{}] }));
    });

    let mut header: Vec<String> = costpull_recon::materialize::FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.push("Compute".into());
    let mut row: Vec<SheetCell> = (0..7).map(|i| SheetCell::Text(format!("c{i}"))).collect();
    row.push(SheetCell::Formula("=SUM(I2:I2)".into()));
    row.push(SheetCell::Number("10.25".parse().unwrap()));
    let table = SheetTable { header, rows: vec![row] };

    let config = GsheetConfig {
        spreadsheet_id: "ss".into(),
        sheet_name_template: "Raw 2006-01".into(),
        main_sheet_name: "Main".into(),
        template_sheet_name: Some("Template".into()),
        anchor_match: AnchorMatch::Contains,
        auto_resize_columns: true,
    };

    let client = GoogleSheetsClient::with_base_url("ss", "tok", server.base_url());
    let month = ReportMonth::parse("2024-08").unwrap();
    let outcome = sync_table(&client, &config, &table, &month).unwrap();

    duplicate.assert();
    write.assert();
    resize.assert();
    assert_eq!(outcome.origin, BlockOrigin::Duplicated);
    assert_eq!(outcome.sheet_id, 99);
    assert_eq!((outcome.anchor.start_row, outcome.anchor.start_column), (1, 0));
}
