//! Monolinux test suite
//!
//! Each case sends one shell command to the booted image and checks the
//! banner it prints. The expected blocks are matched line by line, so
//! values that change from run to run (uptime, dates, versions) are
//! matched by their fixed prefix only.

use crate::core::sequencer::{CaseError, TestCase};
use crate::core::services::{MockService, MqttBrokerService, TcpProbe};
use crate::core::session::Session;

/// What the test cases act on
pub struct Harness {
    /// Console of the booted image
    pub session: Session,
    /// Broker for the MQTT client test
    pub mqtt: MqttBrokerService,
    /// Client for the TCP server test
    pub tcp_probe: TcpProbe,
}

impl Harness {
    /// Create a harness on the standard service addresses
    pub fn new(session: Session) -> Self {
        Self {
            session,
            mqtt: MqttBrokerService::new(),
            tcp_probe: TcpProbe::new(),
        }
    }

    /// Replace the MQTT broker
    #[must_use]
    pub fn with_mqtt(mut self, mqtt: MqttBrokerService) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Replace the TCP probe
    #[must_use]
    pub fn with_tcp_probe(mut self, probe: TcpProbe) -> Self {
        self.tcp_probe = probe;
        self
    }
}

pub const STARTUP_OUTPUT: &str = "\
================= insmod begin =================
Successfully inserted '/root/jbd2.ko'.
Successfully inserted '/root/mbcache.ko'.
Successfully inserted '/root/ext4.ko'.
Loaded modules:
=================== insmod end =================

Welcome to Monolinux!

Uptime:
tcp: Starting the MQTT client, connecting to '10.0.2.2:1883'.
ssl: Starting the MQTT client, connecting to '10.0.2.2:8883'.
";

pub const PROMPT: &str = "$ ";

pub const DISK_OUTPUT: &str = "\
================ disk test begin ===============
MOUNTED ON               TOTAL      USED      FREE
/                        53 MB      2 MB     51 MB
/proc                     0 MB      0 MB      0 MB
/sys                      0 MB      0 MB      0 MB
/mnt/disk1                7 MB      0 MB      7 MB
/mnt/disk2                0 MB      0 MB      0 MB
+---------------------------------------------------+
|   __  __                   _ _                    |
|  |  \\/  |                 | (_)                   |
|  | \\  / | ___  _ __   ___ | |_ _ __  _   ___  __  |
|  | |\\/| |/ _ \\| '_ \\ / _ \\| | | '_ \\| | | \\ \\/ /  |
|  | |  | | (_) | | | | (_) | | | | | | |_| |>  <   |
|  |_|  |_|\\___/|_| |_|\\___/|_|_|_| |_|\\__,_/_/\\_\\  |
|                                                   |
+---------------------------------------------------+
================= disk test end ================
";

pub const HEATSHRINK_OUTPUT: &str = "\
============= heatshrink test begin ============
Heatshrink encode and decode.
============= heatshrink test end ==============
";

pub const LZMA_OUTPUT: &str = "\
================ lzma test begin ===============
LZMA decoder init successful.
================= lzma test end ================
";

pub const DETOOLS_OUTPUT: &str = "\
============== detools test begin ==============
Library version:
From:  /mnt/disk1/detools/v1.txt
Patch: /mnt/disk1/detools/v1-v2.patch
To:    /mnt/disk1/detools/v2.txt
Before patching:
+-----------+
| Version 1 |
+-----------+
After patching:
+-----------+
| Version 2 |
+-----------+
detools: OK!
=============== detools test end ===============
";

pub const RTC_OUTPUT: &str = "\
================ RTC test begin ================
RTC sysfs date:
RTC sysfs time:
RTC date and time:
RTC date and time:
================= RTC test end =================
";

pub const HTTP_OUTPUT: &str = "\
================ http test begin ===============
>>> HTTP GET http://10.0.2.2:8001/. >>>
<<< HTTP GET response code 200. <<<
>>> HTTP GET https://10.0.2.2:4443/. >>>
<<< HTTP GET CURL error code 7: Couldn't connect to server. <<<
================= http test end ================
";

pub const HTTPS_OUTPUT: &str = "\
>>> HTTP GET https://example.com. >>>
<!doctype html>
<<< HTTP GET response code 200. <<<
";

pub const NTP_CLIENT_OUTPUT: &str = "\
================ ntp client test begin ===============
================= ntp client test end ================
";

pub const LOG_OBJECT_OUTPUT: &str = "\
============= log object test begin ============
============== log object test end =============
";

pub const DMESG_OUTPUT: &str = "\
EMERGENCY foo Emergency level!
INFO foo Info level!
DEBUG foo Debug level!
";

pub const NETWORK_FILTER_OUTPUT: &str = "\
============= network filter test begin ============
Dropping HTTP.
Accepting HTTP.
============== network filter test end =============
";

pub const TCP_SERVER_BEGIN: &str = "\
============= TCP server test begin ============
Listening for clients on port 15000.
";

pub const TCP_SERVER_END: &str = "\
Client accepted.
============= TCP server test end ============
";

/// Printed once the client reaches the broker. Its "Starting the MQTT
/// client" lines come out during boot and are checked there.
pub const MQTT_OUTPUT: &str = "\
tcp: Connected.
tcp: Starting the publish timer with timeout 1000 ms.
tcp: Subscribe with transaction id 1 completed.
tcp: Subscribe with transaction id 2 completed.
tcp: Subscribe with transaction id 3 completed.
tcp: Publishing 'count: 0' on 'async/hello'.
tcp: Publishing 'count: 1' on 'async/hello'.
";

/// A case that sends `command` and expects `output`
fn command_case(name: &str, description: &str, command: &'static str, output: &'static str) -> TestCase<Harness> {
    TestCase::new(name, move |h: &mut Harness| {
        h.session.send(command)?;
        h.session.expect_ordered(output)?;
        Ok(())
    })
    .with_description(description)
}

fn boot() -> TestCase<Harness> {
    TestCase::new("boot", |h: &mut Harness| {
        h.session.expect_ordered(STARTUP_OUTPUT)?;
        h.session.send("")?;
        h.session.expect_exact(PROMPT)?;
        Ok(())
    })
    .with_description("Modules load, the welcome banner prints and the shell answers")
}

fn https_get() -> TestCase<Harness> {
    command_case(
        "https_get",
        "HTTPS GET of an external site",
        "http_get https://example.com",
        HTTPS_OUTPUT,
    )
}

fn tcp_server() -> TestCase<Harness> {
    TestCase::new("tcp_server", |h: &mut Harness| {
        h.session.send("test_tcp_server")?;
        h.session.expect_ordered(TCP_SERVER_BEGIN)?;
        h.tcp_probe
            .connect_once()
            .map_err(|e| CaseError::Failed(e.to_string()))?;
        h.session.expect_ordered(TCP_SERVER_END)?;
        Ok(())
    })
    .with_description("The device accepts a connection on port 15000")
}

fn mqtt() -> TestCase<Harness> {
    TestCase::new("mqtt", |h: &mut Harness| {
        h.mqtt.start()?;
        let outcome = h.session.expect_ordered(MQTT_OUTPUT);
        h.mqtt.stop()?;
        outcome?;
        Ok(())
    })
    .with_description("The MQTT client connects, subscribes and publishes")
}

/// All cases, in execution order
pub fn test_cases() -> Vec<TestCase<Harness>> {
    vec![
        boot(),
        command_case("disk", "File systems are mounted", "test_disk", DISK_OUTPUT),
        command_case("heatshrink", "Heatshrink allocation", "test_heatshrink", HEATSHRINK_OUTPUT),
        command_case("lzma", "LZMA decoder init", "test_lzma", LZMA_OUTPUT),
        command_case("detools", "Apply a detools patch", "test_detools", DETOOLS_OUTPUT),
        command_case("rtc", "Read and set the real time clock", "test_rtc", RTC_OUTPUT),
        command_case("http", "HTTP GET from the host file server", "test_http", HTTP_OUTPUT),
        https_get(),
        command_case("ntp_client", "NTP time sync", "test_ntp_client", NTP_CLIENT_OUTPUT),
        command_case("log_object", "Log object at several levels", "test_log_object", LOG_OBJECT_OUTPUT),
        command_case("dmesg", "Log object lines reach the kernel log", "dmesg", DMESG_OUTPUT),
        command_case(
            "network_filter",
            "Drop and accept HTTP traffic",
            "test_network_filter",
            NETWORK_FILTER_OUTPUT,
        ),
        tcp_server(),
        mqtt(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_order() {
        let names: Vec<String> = test_cases().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "boot",
                "disk",
                "heatshrink",
                "lzma",
                "detools",
                "rtc",
                "http",
                "https_get",
                "ntp_client",
                "log_object",
                "dmesg",
                "network_filter",
                "tcp_server",
                "mqtt"
            ]
        );
    }

    #[test]
    fn test_names_unique_and_described() {
        let cases = test_cases();
        let names: HashSet<&str> = cases.iter().map(TestCase::name).collect();
        assert_eq!(names.len(), cases.len());
        assert!(cases.iter().all(|c| !c.description().is_empty()));
    }

    #[test]
    fn test_boot_checks_mqtt_client_start() {
        let lines: Vec<&str> = STARTUP_OUTPUT.lines().collect();
        let uptime = lines.iter().position(|l| *l == "Uptime:").unwrap();
        assert_eq!(
            lines[uptime + 1..].to_vec(),
            vec![
                "tcp: Starting the MQTT client, connecting to '10.0.2.2:1883'.",
                "ssl: Starting the MQTT client, connecting to '10.0.2.2:8883'."
            ]
        );
        assert!(MQTT_OUTPUT.starts_with("tcp: Connected.\n"));
    }

    #[test]
    fn test_disk_banner_survives_escaping() {
        assert!(DISK_OUTPUT.contains(r"|  |  \/  |"));
        assert!(DISK_OUTPUT.contains(r"|  |_|  |_|\___/|_| |_|\___/|_|_|_| |_|\__,_/_/\_\  |"));
    }
}
