//! Read-side views: history, alerts, upcoming schedule, dashboard counters.

use chrono::NaiveDate;

use super::{EngineError, EngineResult, VaccinationEngine};
use crate::db::{ProtocolFilter, ProtocolSort, StoreTx};
use crate::models::{
    ProtocolDetail, ProtocolStatus, RecentDose, VaccinationKpis, VaccinationProtocol,
};
use crate::schedule::add_days;

impl VaccinationEngine<'_> {
    /// Every protocol the animal ever had, archived cycles included, oldest
    /// first, each with its vaccine and dose ledger.
    pub fn history_for_animal(&self, animal_id: &str) -> EngineResult<Vec<ProtocolDetail>> {
        self.read(|tx| {
            if tx.find_animal(animal_id)?.is_none() {
                return Err(EngineError::NotFound(format!("Animal {}", animal_id)));
            }

            let protocols = tx.query_protocols(
                &ProtocolFilter::new().for_animal(animal_id),
                Some(ProtocolSort::CreatedAt),
                None,
            )?;
            with_details(tx, protocols)
        })
    }

    /// Overdue protocols, then in-progress ones due within the alert window.
    pub fn alerts(&self, today: NaiveDate) -> EngineResult<Vec<ProtocolDetail>> {
        let horizon = add_days(today, self.config.alert_window_days);
        self.read(|tx| {
            let mut protocols = tx.query_protocols(
                &ProtocolFilter::new().with_status(ProtocolStatus::Overdue),
                Some(ProtocolSort::NextDoseDate),
                None,
            )?;
            protocols.extend(tx.query_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::InProgress)
                    .next_dose_between(today, horizon),
                Some(ProtocolSort::NextDoseDate),
                None,
            )?);
            with_details(tx, protocols)
        })
    }

    /// Next doses and booster reminders falling in the upcoming window,
    /// earliest first.
    pub fn upcoming_schedule(&self, today: NaiveDate) -> EngineResult<Vec<ProtocolDetail>> {
        let from = add_days(today, 1);
        let until = add_days(today, self.config.upcoming_window_days);
        self.read(|tx| {
            let mut protocols = tx.query_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::InProgress)
                    .next_dose_between(from, until),
                None,
                None,
            )?;
            protocols.extend(tx.query_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::Complete)
                    .only_active()
                    .booster_required(true)
                    .reminder_between(from, until),
                None,
                None,
            )?);
            sort_by_schedule(&mut protocols);
            with_details(tx, protocols)
        })
    }

    /// Dashboard counters, all against the same `today` and snapshot.
    pub fn kpis(&self, today: NaiveDate) -> EngineResult<VaccinationKpis> {
        self.read(|tx| {
            let scheduled = tx.count_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::InProgress)
                    .with_status(ProtocolStatus::Pending)
                    .next_dose_on_or_after(today),
            )?;
            let marked_overdue =
                tx.count_protocols(&ProtocolFilter::new().with_status(ProtocolStatus::Overdue))?;
            let lapsed = tx.count_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::InProgress)
                    .next_dose_before(today),
            )?;
            let completed =
                tx.count_protocols(&ProtocolFilter::new().with_status(ProtocolStatus::Complete))?;

            Ok(VaccinationKpis {
                doses_applied: tx.count_all_doses()?,
                scheduled,
                overdue: marked_overdue + lapsed,
                completed,
            })
        })
    }

    /// The most recently applied doses, newest first. `None` uses the
    /// configured default.
    pub fn recent_doses(&self, limit: Option<usize>) -> EngineResult<Vec<RecentDose>> {
        let limit = limit.unwrap_or(self.config.recent_doses_limit);
        self.read(|tx| Ok(tx.recent_doses(limit)?))
    }
}

/// Stable ascending sort on the schedule date, undated protocols last.
fn sort_by_schedule(protocols: &mut [VaccinationProtocol]) {
    protocols.sort_by_key(|p| {
        let date = p.schedule_date();
        (date.is_none(), date)
    });
}

fn with_details(
    tx: &StoreTx<'_>,
    protocols: Vec<VaccinationProtocol>,
) -> EngineResult<Vec<ProtocolDetail>> {
    protocols
        .into_iter()
        .map(|protocol| {
            let animal = tx.find_animal(&protocol.animal_id)?.ok_or_else(|| {
                EngineError::NotFound(format!("Animal {}", protocol.animal_id))
            })?;
            let vaccine = tx.find_vaccine(&protocol.vaccine_id)?.ok_or_else(|| {
                EngineError::NotFound(format!("Vaccine {}", protocol.vaccine_id))
            })?;
            let doses = tx.list_doses(&protocol.id)?;
            Ok(ProtocolDetail {
                protocol,
                animal,
                vaccine,
                doses,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CycleParams;
    use chrono::Utc;

    fn protocol(next: Option<NaiveDate>, reminder: Option<NaiveDate>) -> VaccinationProtocol {
        let mut p = VaccinationProtocol::new(
            "a".into(),
            "v".into(),
            &CycleParams::multi_dose(2, 7, true),
            Utc::now(),
        );
        p.next_dose_date = next;
        p.next_cycle_reminder_date = reminder;
        p
    }

    #[test]
    fn test_sort_by_schedule_is_stable_with_undated_last() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day);
        let mut protocols = vec![
            protocol(None, None),
            protocol(d(20), None),
            protocol(None, d(5)),
            protocol(d(5), None),
            protocol(None, None),
        ];
        let ids: Vec<_> = protocols.iter().map(|p| p.id.clone()).collect();

        sort_by_schedule(&mut protocols);
        let sorted: Vec<_> = protocols.iter().map(|p| p.id.clone()).collect();
        assert_eq!(
            sorted,
            vec![
                ids[2].clone(),
                ids[3].clone(),
                ids[1].clone(),
                ids[0].clone(),
                ids[4].clone()
            ]
        );
    }
}
