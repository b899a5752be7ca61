//! Tests for the exported `ShelterVaxCore` surface.

use shelter_vax_core::{
    open_database, open_database_in_memory, FfiDoseRegistration, FfiProtocolStatus,
    ShelterVaxCore, ShelterVaxError,
};
use std::sync::Arc;

fn registration(core: &ShelterVaxCore) -> FfiDoseRegistration {
    let animal = core.create_animal("Pipoca".into()).unwrap();
    let vaccine = core.create_vaccine("V10".into()).unwrap();
    FfiDoseRegistration {
        animal_id: animal.id,
        vaccine_id: vaccine.id,
        lab: "Zoetis".into(),
        batch: "L-2024".into(),
        attending_vet: "Dr. Lima".into(),
        amount_paid: 75.5,
        applied_at: None,
        doses_required: Some(3),
        interval_days: Some(21),
        requires_annual_booster: true,
        timeout_ms: Some(2_000),
    }
}

#[test]
fn test_register_and_read_back() {
    let core = open_database_in_memory().unwrap();
    let request = registration(&core);
    let animal_id = request.animal_id.clone();

    let result = core.register_dose(request).unwrap();
    assert_eq!(result.protocol.status, FfiProtocolStatus::InProgress);
    assert_eq!(result.protocol.doses_required, 3);
    assert_eq!(result.doses.len(), 1);
    assert_eq!(result.doses[0].batch, "L-2024");
    assert!(result.protocol.next_dose_date.is_some());

    let history = core.history_for_animal(animal_id, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].animal.name, "Pipoca");
    assert_eq!(history[0].vaccine.name, "V10");

    let kpis = core.kpis(None).unwrap();
    assert_eq!(kpis.doses_applied, 1);
    assert_eq!(kpis.scheduled, 1);
    assert_eq!(kpis.completed, 0);

    let recent = core.recent_doses(Some(1), Some(1_000)).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].dose.id, result.doses[0].id);

    // 21 days out is inside the upcoming window but outside alerts
    assert_eq!(core.upcoming_schedule(None).unwrap().len(), 1);
    assert!(core.alerts(Some(1_000)).unwrap().is_empty());
    assert_eq!(core.sweep_overdue().unwrap(), 0);
}

#[test]
fn test_explicit_applied_at_is_kept() {
    let core = open_database_in_memory().unwrap();
    let mut request = registration(&core);
    request.applied_at = Some("2024-04-10T13:00:00-03:00".into());

    let result = core.register_dose(request).unwrap();
    assert_eq!(result.doses[0].applied_at, "2024-04-10T16:00:00+00:00");
}

#[test]
fn test_admin_edits() {
    let core = open_database_in_memory().unwrap();
    let result = core.register_dose(registration(&core)).unwrap();
    let protocol_id = result.protocol.id;

    let updated = core
        .update_protocol_params(protocol_id.clone(), Some(1), None)
        .unwrap();
    assert_eq!(updated.protocol.status, FfiProtocolStatus::Complete);
    assert!(updated.protocol.next_cycle_reminder_date.is_some());

    let reopened = core
        .set_protocol_status(protocol_id, FfiProtocolStatus::Overdue)
        .unwrap();
    assert_eq!(reopened.protocol.status, FfiProtocolStatus::Overdue);
    assert!(reopened.protocol.next_cycle_reminder_date.is_none());
}

#[test]
fn test_errors_map_to_ffi_variants() {
    let core = open_database_in_memory().unwrap();

    let mut request = registration(&core);
    request.animal_id = "missing".into();
    assert!(matches!(
        core.register_dose(request),
        Err(ShelterVaxError::NotFound(_))
    ));

    let mut request = registration(&core);
    request.doses_required = None;
    assert!(matches!(
        core.register_dose(request),
        Err(ShelterVaxError::InvalidInput(_))
    ));

    let mut request = registration(&core);
    request.applied_at = Some("yesterday".into());
    assert!(matches!(
        core.register_dose(request),
        Err(ShelterVaxError::InvalidInput(_))
    ));

    let mut request = registration(&core);
    request.doses_required = Some(1);
    request.requires_annual_booster = false;
    core.register_dose(request.clone()).unwrap();
    assert!(matches!(
        core.register_dose(request),
        Err(ShelterVaxError::InvalidState(_))
    ));

    assert!(matches!(
        core.set_protocol_status("missing".into(), FfiProtocolStatus::Pending),
        Err(ShelterVaxError::NotFound(_))
    ));
}

#[test]
fn test_query_timeouts() {
    let core = open_database_in_memory().unwrap();
    core.register_dose(registration(&core)).unwrap();

    assert!(matches!(core.kpis(Some(0)), Err(ShelterVaxError::Timeout(_))));
    assert!(matches!(
        core.upcoming_schedule(Some(0)),
        Err(ShelterVaxError::Timeout(_))
    ));
    assert_eq!(core.kpis(Some(5_000)).unwrap().doses_applied, 1);
}

#[test]
fn test_catalog_updates() {
    let core = open_database_in_memory().unwrap();
    let mut animal = core.create_animal("Farofa".into()).unwrap();
    animal.breed = Some("SRD".into());
    animal.rescued_on = Some("2023-11-02".into());
    core.update_animal(animal.clone()).unwrap();

    let stored = core.get_animal(animal.id.clone()).unwrap().unwrap();
    assert_eq!(stored.breed.as_deref(), Some("SRD"));
    assert_eq!(stored.rescued_on.as_deref(), Some("2023-11-02"));

    animal.rescued_on = Some("02/11/2023".into());
    assert!(matches!(
        core.update_animal(animal.clone()),
        Err(ShelterVaxError::InvalidInput(_))
    ));

    animal.id = "ghost".into();
    animal.rescued_on = None;
    assert!(matches!(
        core.update_animal(animal),
        Err(ShelterVaxError::NotFound(_))
    ));

    assert_eq!(core.search_animals("Far".into(), 10).unwrap().len(), 1);
    assert!(core.delete_animal(stored.id).unwrap());
    assert!(core.list_animals().unwrap().is_empty());
}

#[test]
fn test_file_database_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shelter.db").to_string_lossy().into_owned();

    let vaccine_id = {
        let core: Arc<ShelterVaxCore> = open_database(path.clone()).unwrap();
        core.create_vaccine("Antirrábica".into()).unwrap().id
    };

    let core = open_database(path).unwrap();
    let vaccine = core.get_vaccine(vaccine_id).unwrap().unwrap();
    assert_eq!(vaccine.name, "Antirrábica");
}
