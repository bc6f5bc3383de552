mod common;

use common::{PEOPLE_CSV, params, people_workflow, strings};
use csv_map_fields::config::MapFieldsConfig;
use csv_map_fields::error::MapFieldsError;
use csv_map_fields::mapping::MappingKey;
use csv_map_fields::params::ParameterPair;
use csv_map_fields::session::{MemorySession, SessionEntry, SessionStore, WorkflowState};
use csv_map_fields::storage::{MemoryStorage, Storage};
use csv_map_fields::workflow::{
    ExpectedFields, MapFields, MapFieldsRequest, Transition, UploadedFile,
};
use serde_json::json;

fn upload_request(content: &str) -> MapFieldsRequest {
    MapFieldsRequest::new("42").with_file("file", UploadedFile::new("people.csv", content))
}

fn mapping_request() -> MapFieldsRequest {
    MapFieldsRequest::new("42").with_params(params(json!({
        "fields": { "1": "1", "2": "2", "3": "3" }
    })))
}

fn uploaded(workflow: &MapFields<MemoryStorage>) -> Transition {
    let transition = workflow.before(&WorkflowState::Empty, &upload_request(PEOPLE_CSV));
    assert!(transition.outcome.error().is_none());
    transition
}

#[test]
fn upload_stores_file_and_awaits_mapping() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let transition = uploaded(&workflow);

    let key = transition.state.storage_key().expect("storage key").to_string();
    assert!(key.starts_with("csv_42/"));
    assert!(key.ends_with("/people.csv"));
    assert_eq!(transition.outcome.storage_key(), Some(key.as_str()));

    let stored = workflow.storage().get(&key, "uploads").expect("stored object");
    assert_eq!(stored.content, PEOPLE_CSV.as_bytes());
    assert_eq!(stored.content_type.as_deref(), Some("text/csv"));

    let outcome = &transition.outcome;
    assert_eq!(outcome.fields_mapped().unwrap(), None);
    assert_eq!(
        outcome.rows(),
        &[
            strings(&["Full Name", "E-Mail Address", "Age"]),
            strings(&["Ann Lee", "ann@example.com", "34"]),
        ]
    );
    assert_eq!(
        outcome.fields(),
        &[
            ("name".to_string(), 0),
            ("email".to_string(), 1),
            ("age".to_string(), 2),
        ]
    );
}

#[test]
fn missing_or_blank_upload_resets_to_empty() {
    let workflow = people_workflow(MapFieldsConfig::default());

    let transition = workflow.before(&WorkflowState::Empty, &MapFieldsRequest::new("42"));
    assert_eq!(transition.state, WorkflowState::Empty);
    assert_eq!(
        transition.outcome.fields_mapped().unwrap_err(),
        MapFieldsError::MissingFileContents
    );
    assert!(transition.outcome.rows().is_empty());
    assert!(transition.outcome.fields().is_empty());

    let transition = workflow.before(&WorkflowState::Empty, &upload_request(""));
    assert_eq!(transition.state, WorkflowState::Empty);
    assert_eq!(
        transition.outcome.error(),
        Some(&MapFieldsError::MissingFileContents)
    );
    assert!(workflow.storage().is_empty());
}

#[test]
fn custom_file_field_is_honoured() {
    let config = MapFieldsConfig {
        file_field: "upload".to_string(),
        ..MapFieldsConfig::default()
    };
    let workflow = people_workflow(config);

    let wrong_field = workflow.before(&WorkflowState::Empty, &upload_request(PEOPLE_CSV));
    assert_eq!(
        wrong_field.outcome.error(),
        Some(&MapFieldsError::MissingFileContents)
    );

    let request = MapFieldsRequest::new("42")
        .with_file("upload", UploadedFile::new("people.csv", PEOPLE_CSV));
    let transition = workflow.before(&WorkflowState::Empty, &request);
    assert!(matches!(
        transition.state,
        WorkflowState::AwaitingMapping { .. }
    ));
}

#[test]
fn mapping_submission_previews_and_cleanup_deletes_upload() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);
    let key = first.state.storage_key().unwrap().to_string();

    let second = workflow.before(&first.state, &mapping_request());
    assert_eq!(second.state, first.state);
    let mut outcome = second.outcome;
    let preview = outcome.fields_mapped().unwrap().expect("mapping preview");
    assert_eq!(preview.len(), 2);
    assert_eq!(preview[1], strings(&["Ann Lee", "ann@example.com", "34"]));
    assert_eq!(outcome.rows().len(), 2);
    assert_eq!(outcome.fields().len(), 3);

    {
        let mapper = workflow.mapper(&outcome, true).expect("mapper");
        let rows = mapper
            .rows()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].number(), 2);
        assert_eq!(rows[0].get_text("name"), Some("Ann Lee"));
        assert_eq!(rows[2].get(MappingKey::Symbol("email")), Some("cy@example.com"));
    }

    let cleanup = workflow.cleanup(&second.state, &mut outcome);
    assert_eq!(cleanup.state, WorkflowState::Empty);
    assert_eq!(cleanup.deleted.as_deref(), Some(key.as_str()));
    assert!(cleanup.error.is_none());
    assert!(workflow.storage().get(&key, "uploads").is_none());
    assert!(outcome.mapped_fields().is_none());
    assert!(outcome.rows().is_empty());
    assert!(outcome.error().is_none());
}

#[test]
fn cleanup_after_upload_keeps_file_for_next_request() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let mut first = uploaded(&workflow);
    let cleanup = workflow.cleanup(&first.state, &mut first.outcome);
    assert_eq!(cleanup.state, first.state);
    assert!(cleanup.deleted.is_none());
    assert_eq!(workflow.storage().len(), 1);
}

#[test]
fn missing_mapping_params_is_inconsistent() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);

    let mut second = workflow.before(&first.state, &MapFieldsRequest::new("42"));
    assert_eq!(second.state, WorkflowState::Empty);
    assert_eq!(
        second.outcome.fields_mapped().unwrap_err(),
        MapFieldsError::InconsistentState
    );
    assert!(second.outcome.rows().is_empty());
    assert!(second.outcome.fields().is_empty());

    let cleanup = workflow.cleanup(&second.state, &mut second.outcome);
    assert!(cleanup.deleted.is_none());
    assert_eq!(workflow.storage().len(), 1);
}

#[test]
fn session_without_recorded_upload_is_inconsistent() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let transition = workflow.before(&WorkflowState::Incomplete, &mapping_request());
    assert_eq!(transition.state, WorkflowState::Empty);
    assert_eq!(
        transition.outcome.error(),
        Some(&MapFieldsError::InconsistentState)
    );
}

#[test]
fn malformed_upload_is_reported_and_left_in_storage() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);
    let key = first.state.storage_key().unwrap().to_string();
    workflow
        .storage()
        .put(&key, "uploads", "Full Name,Age\nAnn Lee,34,extra\n");

    let mut second = workflow.before(&first.state, &mapping_request());
    assert_eq!(second.state, first.state);
    let err = second.outcome.fields_mapped().unwrap_err();
    assert!(err.is_malformed_csv(), "unexpected error {err:?}");
    // the captured error is raised on every access
    assert_eq!(second.outcome.fields_mapped().unwrap_err(), err);
    // no preview read or field list once an error was captured
    assert!(second.outcome.rows().is_empty());
    assert!(second.outcome.fields().is_empty());
    assert!(workflow.mapper(&second.outcome, false).is_err());

    let cleanup = workflow.cleanup(&second.state, &mut second.outcome);
    assert_eq!(cleanup.state, first.state);
    assert!(workflow.storage().get(&key, "uploads").is_some());
}

#[test]
fn malformed_record_past_the_preview_rows_is_reported_and_kept() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = workflow.before(
        &WorkflowState::Empty,
        &upload_request("a,b,c\n1,2,3\n4,5,6\n7\n"),
    );
    // the upload preview stops before the bad record
    assert!(first.outcome.error().is_none());
    assert_eq!(first.outcome.rows().len(), 2);
    let key = first.state.storage_key().unwrap().to_string();

    let request = MapFieldsRequest::new("42").with_params(params(json!({
        "fields": { "1": "1" }
    })));
    let mut second = workflow.before(&first.state, &request);
    assert_eq!(
        second.outcome.fields_mapped().unwrap_err(),
        MapFieldsError::MalformedCsv {
            record: Some(4),
            message: "found record with 1 field(s), expected 3".to_string(),
        }
    );
    assert_eq!(second.outcome.mapped_fields(), None);

    let cleanup = workflow.cleanup(&second.state, &mut second.outcome);
    assert_eq!(cleanup.deleted, None);
    assert_eq!(cleanup.state, first.state);
    assert!(workflow.storage().get(&key, "uploads").is_some());
}

#[test]
fn file_corrupted_after_mapping_surfaces_during_iteration() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);
    let second = workflow.before(&first.state, &mapping_request());
    assert!(second.outcome.fields_mapped().unwrap().is_some());

    // each pass rereads storage, so a later change is seen by the mapper
    let key = first.state.storage_key().unwrap();
    workflow
        .storage()
        .put(key, "uploads", "Full Name,Age\nAnn Lee,34\nBo Chen\n");
    let mapper = workflow.mapper(&second.outcome, false).unwrap();
    let results: Vec<_> = mapper.rows().unwrap().collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].as_ref().unwrap_err().is_malformed_csv());
}

#[test]
fn invalid_correspondence_is_captured() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);
    let request = MapFieldsRequest::new("42").with_params(params(json!({
        "fields": { "one": "1" }
    })));
    let second = workflow.before(&first.state, &request);
    assert!(matches!(
        second.outcome.fields_mapped(),
        Err(MapFieldsError::InvalidCorrespondence(_))
    ));
    assert_eq!(second.state, first.state);
}

#[test]
fn new_upload_restarts_the_workflow_and_drops_the_replaced_file() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let first = uploaded(&workflow);
    let old_key = first.state.storage_key().unwrap().to_string();

    let second = workflow.before(&first.state, &upload_request("a,b\n1,2\n"));
    assert_ne!(second.state, first.state);
    assert_eq!(second.outcome.rows()[0], strings(&["a", "b"]));
    assert_eq!(workflow.storage().len(), 1);
    assert!(workflow.storage().get(&old_key, "uploads").is_none());
    let new_key = second.state.storage_key().unwrap();
    assert!(workflow.storage().get(new_key, "uploads").is_some());
}

#[test]
fn new_upload_succeeds_when_replaced_file_is_already_gone() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let stale = WorkflowState::AwaitingMapping {
        storage_key: "csv_42/1/abcdef01/gone.csv".to_string(),
    };
    let transition = workflow.before(&stale, &upload_request(PEOPLE_CSV));
    assert!(transition.outcome.error().is_none());
    assert!(transition.state.storage_key().is_some());
    assert_ne!(transition.state, stale);
}

#[test]
fn dynamic_expected_fields_follow_request_params() {
    let workflow = MapFields::new(
        MapFieldsConfig::default(),
        ExpectedFields::dynamic(|params| {
            let mut fields = vec!["name".to_string()];
            if params.get("with_phone").is_some() {
                fields.push("phone".to_string());
            }
            fields
        }),
        MemoryStorage::new(),
    )
    .unwrap();

    let plain = workflow.before(&WorkflowState::Empty, &upload_request(PEOPLE_CSV));
    assert_eq!(plain.outcome.fields(), &[("name".to_string(), 0)]);

    let request = upload_request(PEOPLE_CSV).with_param("with_phone", json!("1"));
    let extended = workflow.before(&WorkflowState::Empty, &request);
    assert_eq!(
        extended.outcome.fields(),
        &[("name".to_string(), 0), ("phone".to_string(), 1)]
    );
}

#[test]
fn configured_parameter_groups_are_flattened_in_order() {
    let config = MapFieldsConfig {
        params: strings(&["owner", "import"]),
        ..MapFieldsConfig::default()
    };
    let workflow = people_workflow(config);
    let request = upload_request(PEOPLE_CSV).with_params(params(json!({
        "import": { "tags": ["a", "b"] },
        "ignored": 1,
        "owner": { "id": 7 }
    })));
    let transition = workflow.before(&WorkflowState::Empty, &request);
    assert_eq!(
        transition.outcome.parameters(),
        &[
            ParameterPair::new("owner[id]", json!(7)),
            ParameterPair::new("import[tags][]", json!("a")),
            ParameterPair::new("import[tags][]", json!("b")),
        ]
    );
}

#[test]
fn session_actions_persist_only_the_file_key() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let mut session = MemorySession::new();

    let mut outcome = workflow
        .before_action(&mut session, &upload_request(PEOPLE_CSV))
        .unwrap();
    workflow.after_action(&mut session, &mut outcome).unwrap();
    let entry = session.load().unwrap().expect("session entry");
    let key = entry.file.clone().expect("file key");
    assert_eq!(workflow.storage().len(), 1);

    let mut outcome = workflow
        .before_action(&mut session, &mapping_request())
        .unwrap();
    assert!(outcome.fields_mapped().unwrap().is_some());
    assert_eq!(session.load().unwrap(), Some(entry));

    workflow.after_action(&mut session, &mut outcome).unwrap();
    assert_eq!(session.load().unwrap(), None);
    assert!(workflow.storage().get(&key, "uploads").is_none());
}

#[test]
fn after_action_reports_failed_delete_but_still_resets() {
    let workflow = people_workflow(MapFieldsConfig::default());
    let mut session = MemorySession::with_entry(SessionEntry {
        file: Some("csv_42/1/abcdef01/people.csv".to_string()),
    });
    workflow
        .storage()
        .put("csv_42/1/abcdef01/people.csv", "uploads", PEOPLE_CSV);

    let mut outcome = workflow
        .before_action(&mut session, &mapping_request())
        .unwrap();
    assert!(outcome.fields_mapped().unwrap().is_some());

    // Remove the object behind the workflow's back so the delete fails.
    workflow
        .storage()
        .delete("csv_42/1/abcdef01/people.csv", "uploads")
        .unwrap();
    let err = workflow.after_action(&mut session, &mut outcome).unwrap_err();
    assert!(matches!(err, MapFieldsError::Storage(_)));
    assert_eq!(session.load().unwrap(), None);
}
