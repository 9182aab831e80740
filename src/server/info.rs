//! Status document served by the monitor.
//!
//! ```text
//! <fastcgi-container>
//!   <status>running</status>
//!   <pools>
//!     <endpoint_pools>
//!       <endpoint socket="127.0.0.1:9000" threads="4" busy="1"/>
//!     </endpoint_pools>
//!     <pool name="background" threads="2" busy="0" queue="100" current_queue="0" all_tasks="12" exception_tasks="1"/>
//!   </pools>
//! </fastcgi-container>
//! ```
//!
//! The `<pools>` section is only present while the server is running.

use std::fmt::Write as _;

use super::Status;
use crate::components::ThreadPoolInfo;

/// Snapshot of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub socket: String,
    pub threads: usize,
    pub busy: usize,
}

/// Snapshot of one named pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub name: String,
    pub info: ThreadPoolInfo,
}

/// Render the status document.
pub fn render(status: Status, endpoints: &[EndpointInfo], pools: &[PoolInfo]) -> String {
    let mut out = String::from("<fastcgi-container>\n");
    let _ = writeln!(out, "  <status>{status}</status>");

    if status == Status::Running {
        out.push_str("  <pools>\n");
        out.push_str("    <endpoint_pools>\n");
        for ep in endpoints {
            let _ = writeln!(
                out,
                "      <endpoint socket=\"{}\" threads=\"{}\" busy=\"{}\"/>",
                escape(&ep.socket),
                ep.threads,
                ep.busy
            );
        }
        out.push_str("    </endpoint_pools>\n");
        for pool in pools {
            let info = &pool.info;
            let _ = writeln!(
                out,
                "    <pool name=\"{}\" threads=\"{}\" busy=\"{}\" queue=\"{}\" current_queue=\"{}\" all_tasks=\"{}\" exception_tasks=\"{}\"/>",
                escape(&pool.name),
                info.threads,
                info.busy,
                info.queue_length,
                info.current_queue,
                info.all_tasks(),
                info.bad_tasks
            );
        }
        out.push_str("  </pools>\n");
    }

    out.push_str("</fastcgi-container>\n");
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
