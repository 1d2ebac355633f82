use std::collections::BTreeMap;

use meter_client::{CurveRecord, MeteringChannel};
use time::{format_description::BorrowedFormatItem, macros::format_description, Date, Duration, PrimitiveDateTime};

/// Layout of the provider's `meterDate` field, local time, hour ending.
pub const METER_DATE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[day]/[month]/[year] [hour]:[minute]");

/// A calendar day is only usable when every metered hour is present.
pub const RECORDS_PER_DAY: usize = 24;

pub fn parse_meter_date(raw: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(raw, METER_DATE_FORMAT)
}

/// Curve records partitioned into complete calendar days.
///
/// Day keys are the date of `meterDate - 1h`, so the 24 records stamped
/// `01:00` through next-day `00:00` all land on the day they meter.
pub struct DayGroups<'a> {
    pub days: BTreeMap<Date, Vec<(PrimitiveDateTime, &'a CurveRecord)>>,
    pub skipped: usize,
}

/// Group records by calendar day and drop every day that is not fully usable.
///
/// A record with an unparsable `meterDate` is skipped on its own; grouping
/// tolerates partial upstream corruption. A grouped day survives only with
/// exactly [`RECORDS_PER_DAY`] records, each carrying a non-empty value for
/// the target channel — otherwise the whole day is discarded, so a partial
/// day can never move the running total.
pub fn group_valid_days<'a>(
    records: &'a [CurveRecord],
    supply: &str,
    channel: MeteringChannel,
) -> DayGroups<'a> {
    let mut days: BTreeMap<Date, Vec<(PrimitiveDateTime, &'a CurveRecord)>> = BTreeMap::new();
    let mut skipped = 0usize;

    for rec in records {
        match parse_meter_date(&rec.meter_date) {
            Ok(meter_dt) => {
                let day_key = (meter_dt - Duration::hours(1)).date();
                days.entry(day_key).or_default().push((meter_dt, rec));
            }
            Err(e) => {
                tracing::info!(supply, raw = %rec.meter_date, error = %e, "could not group curve record");
                skipped += 1;
            }
        }
    }

    days.retain(|day, day_records| {
        let complete = day_records.len() == RECORDS_PER_DAY
            && day_records
                .iter()
                .all(|(_, r)| r.value(channel).is_some_and(|v| !v.is_empty()));
        if !complete {
            tracing::debug!(
                supply,
                %channel,
                day = %day,
                records = day_records.len(),
                "rejecting day with missing or invalid records"
            );
            skipped += day_records.len();
        }
        complete
    });

    DayGroups { days, skipped }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::date;

    use super::*;

    fn hourly_day(day: &str, next_day: &str, value: &str) -> Vec<CurveRecord> {
        // 01:00 .. 23:00 on `day`, plus 00:00 on `next_day`.
        let mut records: Vec<CurveRecord> = (1..=23)
            .map(|h| CurveRecord {
                meter_date: format!("{day} {h:02}:00"),
                consumption: Some(value.to_string()),
                production: None,
                injection: None,
            })
            .collect();
        records.push(CurveRecord {
            meter_date: format!("{next_day} 00:00"),
            consumption: Some(value.to_string()),
            production: None,
            injection: None,
        });
        records
    }

    #[test]
    fn back_shift_keeps_a_metered_day_together() {
        let records = hourly_day("21/04/2025", "22/04/2025", "1");
        let groups = group_valid_days(&records, "123456789", MeteringChannel::Consumption);

        assert_eq!(groups.days.len(), 1);
        assert_eq!(groups.skipped, 0);
        let day = groups.days.get(&date!(2025 - 04 - 21)).expect("day present");
        assert_eq!(day.len(), 24);
    }

    #[test]
    fn incomplete_day_is_discarded_whole() {
        let mut records = hourly_day("21/04/2025", "22/04/2025", "1");
        records.pop();
        let groups = group_valid_days(&records, "123456789", MeteringChannel::Consumption);

        assert!(groups.days.is_empty());
        assert_eq!(groups.skipped, 23);
    }

    #[test]
    fn empty_channel_value_discards_the_day() {
        let mut records = hourly_day("21/04/2025", "22/04/2025", "1");
        records[5].consumption = Some(String::new());
        let groups = group_valid_days(&records, "123456789", MeteringChannel::Consumption);

        assert!(groups.days.is_empty());
        assert_eq!(groups.skipped, 24);
    }

    #[test]
    fn missing_channel_value_discards_the_day() {
        let records = hourly_day("21/04/2025", "22/04/2025", "1");
        // Complete for consumption, but production was never reported.
        let groups = group_valid_days(&records, "123456789", MeteringChannel::Production);

        assert!(groups.days.is_empty());
        assert_eq!(groups.skipped, 24);
    }

    #[test]
    fn unparsable_meter_date_skips_only_that_record() {
        let mut records = hourly_day("21/04/2025", "22/04/2025", "1");
        records.push(CurveRecord {
            meter_date: "not a date".to_string(),
            consumption: Some("1".to_string()),
            production: None,
            injection: None,
        });
        let groups = group_valid_days(&records, "123456789", MeteringChannel::Consumption);

        assert_eq!(groups.days.len(), 1);
        assert_eq!(groups.skipped, 1);
    }
}
