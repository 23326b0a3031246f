//! Test fixtures and common test data.
//!
//! Pages and payloads shaped like the ones the ESB Networks portal and its identity
//! provider serve, plus reading generators for the importer.

/// Common test data constants.
pub mod constants {
    pub const MPRN: &str = "10012345678";
    pub const EMAIL: &str = "meter.owner@example.ie";
    pub const PASSWORD: &str = "correct horse battery staple";

    /// Anti-forgery token embedded in the sign-in page.
    pub const CSRF: &str = "Y3NyZi10b2tlbi0xMjM=";

    /// B2C transaction id embedded in the sign-in page.
    pub const TRANS_ID: &str = "StateProperties=eyJUSUQiOiJhYmMxMjMifQ";

    pub const FORM_STATE: &str = "CfDJ8state";
    pub const FORM_CLIENT_INFO: &str = "eyJ1aWQiOiIxMjMifQ";
    pub const FORM_CODE: &str = "eyJraWQiOiJjcGltY29yZSJ9.code";

    pub const DOWNLOAD_TOKEN: &str = "CfDJ8xsrf-download-token";

    pub const READ_TYPE: &str = "Active Import Interval (kW)";
    pub const METER_SERIAL: &str = "000000000024591234";
}

use constants::*;

/// The B2C sign-in page with its inline settings script.
pub fn sign_in_page(csrf: &str, trans_id: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Sign in</title>
  <script type="text/javascript">
    var SETTINGS = {{"remoteResource":"https://login.esbnetworks.ie/static/signin.html","hosts":{{"tenant":"/esbntwkscustportalprdb2c01.onmicrosoft.com/B2C_1A_signup_signin"}},"csrf":"{}","transId":"{}","api":"CombinedSigninAndSignup"}};
  </script>
</head>
<body><div id="api"></div></body>
</html>"#,
        csrf, trans_id
    )
}

/// The page served after a successful sign-in, carrying the auto-submitting form.
pub fn confirmed_page(action: &str) -> String {
    format!(
        r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Working...</title></head>
<body>
  <form id="auto" method="post" action="{}">
    <input type="hidden" name="state" value="{}" />
    <input type="hidden" name="client_info" value="{}" />
    <input type="hidden" name="code" value="{}" />
    <noscript><input type="submit" value="Continue" /></noscript>
  </form>
  <script>document.getElementById('auto').submit();</script>
</body>
</html>"#,
        action, FORM_STATE, FORM_CLIENT_INFO, FORM_CODE
    )
}

/// The half-hourly interval CSV for `(read date and end time, read value)` rows.
pub fn usage_csv(rows: &[(&str, &str)]) -> String {
    let mut csv =
        String::from("MPRN,Meter Serial Number,Read Value,Read Type,Read Date and End Time\r\n");
    for (date, value) in rows {
        csv.push_str(&format!(
            "{},{},{},{},{}\r\n",
            MPRN, METER_SERIAL, value, READ_TYPE, date
        ));
    }
    csv
}

/// Reading generators.
pub mod readings {
    use super::constants::READ_TYPE;
    use crate::model::Reading;
    use crate::statistics::READING_DATE_FORMAT;
    use chrono::{Duration, NaiveDate};

    pub fn reading(date: &str, usage: f64) -> Reading {
        Reading {
            date: date.to_string(),
            usage,
            read_type: READ_TYPE.to_string(),
        }
    }

    /// Consecutive half-hour readings of one day (`DD-MM-YYYY`), the first ending at 00:30.
    pub fn half_hourly(day: &str, usages: &[f64]) -> Vec<Reading> {
        let start = NaiveDate::parse_from_str(day, "%d-%m-%Y")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        usages
            .iter()
            .enumerate()
            .map(|(i, usage)| {
                let end = start + Duration::minutes(30 * (i as i64 + 1));
                reading(&end.format(READING_DATE_FORMAT).to_string(), *usage)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_hourly_rolls_over_midnight() {
        let values = vec![0.1; 48];
        let generated = readings::half_hourly("01-01-2025", &values);

        assert_eq!(generated[0].date, "01-01-2025 00:30");
        assert_eq!(generated[1].date, "01-01-2025 01:00");
        assert_eq!(generated[47].date, "02-01-2025 00:00");
    }

    #[test]
    fn test_usage_csv_header() {
        let csv = usage_csv(&[("01-01-2025 00:30", "0.25")]);
        assert!(csv.starts_with("MPRN,"));
        assert_eq!(csv.lines().count(), 2);
    }
}
