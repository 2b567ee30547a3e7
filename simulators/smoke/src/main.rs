#![warn(clippy::unwrap_used)]

use std::collections::HashMap;

use labusim::utils::client_test_name;
use labusim::{dyn_async, run_suite, Client, ClientTestSpec, Simulation, Suite, Test, TestSpec};

dyn_async! {
    async fn client_roster<'a>(test: &'a mut Test) {
        let roster = test.sim().client_types().await;
        match roster {
            Ok(clients) if !clients.is_empty() => {
                let names: Vec<String> = clients.into_iter().map(|c| c.name).collect();
                test.log(&format!("clients: {}", names.join(",")));
            }
            Ok(_) => test.fail("no clients registered"),
            Err(err) => test.fail(format!("client listing failed: {err}")),
        }
    }
}

dyn_async! {
    async fn echo_roundtrip<'a>(test: &'a mut Test, client: Client) {
        let command = vec!["echo".to_string(), "hello".to_string()];
        let result = client.exec(&command).await;
        match result {
            Ok(out) if out.exit_code == 0 && out.stdout.trim() == "hello" => {
                test.log(&format!("echo ok from {}", client.container));
            }
            Ok(out) => test.fail(format!(
                "unexpected echo result: exit {}, stdout {:?}",
                out.exit_code, out.stdout
            )),
            Err(err) => test.fail(format!("exec failed: {err}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut suite = Suite::new(
        "devnet-smoke",
        "Checks the basics of every client: it can be launched on the overlay \
         network and responds to command execution.",
    );

    suite.add(TestSpec {
        name: "client-roster".to_string(),
        description: "Lists the clients available to this run.".to_string(),
        run: client_roster,
    });

    for client in labusim::client_list() {
        suite.add_client(ClientTestSpec {
            name: client_test_name("echo CLIENT", &client),
            description: "Starts the client and runs a command inside it.".to_string(),
            client,
            networks: vec![],
            environment: HashMap::new(),
            files: HashMap::new(),
            run: echo_roundtrip,
        });
    }

    let sim = Simulation::new();
    if let Err(err) = run_suite(&sim, &suite).await {
        eprintln!("suite failed: {err}");
        std::process::exit(1);
    }
}
