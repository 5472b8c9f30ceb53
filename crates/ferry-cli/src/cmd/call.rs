//! `ferry call`: one module call against a running remote.

use super::{connect, parse_param, report_error, runtime};
use ferry_client::{ProxyFactory, ProxyOptions};
use ferry_types::config::FerryConfig;

pub fn cmd_call(config: FerryConfig, module: &str, method: &str, params: &[String], addr: &str) {
    let params = params.iter().map(|p| parse_param(p)).collect();
    let rt = runtime();
    let result = rt.block_on(async {
        let client = connect(&config, addr).await?;
        let proxy = ProxyFactory::new(client).proxy_for(module, ProxyOptions::default());
        proxy.call(method, params).await
    });

    match result {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        ),
        Err(e) => {
            report_error(&e, addr);
            std::process::exit(1);
        }
    }
}
