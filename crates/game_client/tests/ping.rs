use game_client::app::run_pings;
use game_client::{PingClientHandler, PingStats};
use game_net::{Client, ClientConfig, Server, ServerConfig, ServiceConfig, TickMode};
use game_server::GameServerHandler;
use std::sync::Arc;
use std::time::Duration;

fn client_config(server: &Server) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port: server.local_addr().port(),
        service: ServiceConfig {
            worker_threads: 1,
            tick_mode: TickMode::Manual,
            measure_tick_rate: false,
            ..ServiceConfig::default()
        },
    }
}

fn start_server() -> Server {
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        service: ServiceConfig {
            worker_threads: 2,
            tick_mode: TickMode::Auto {
                interval: Duration::from_millis(5),
            },
            measure_tick_rate: false,
            ..ServiceConfig::default()
        },
    };
    Server::start(config, GameServerHandler::new()).unwrap()
}

#[test]
fn test_pings_are_answered() {
    let server = start_server();
    let stats = Arc::new(PingStats::default());
    let client = Client::connect(client_config(&server), PingClientHandler::new(stats.clone()))
        .unwrap();

    let answered = run_pings(&client, &stats, 3, Duration::from_millis(10)).unwrap();

    assert_eq!(answered, 3);
    assert!(stats.is_accepted());
    assert_eq!(stats.round_trips().len(), 3);
    assert!(stats.average_round_trip().is_some());
}

#[test]
fn test_run_fails_once_server_is_gone() {
    let server = start_server();
    let stats = Arc::new(PingStats::default());
    let client = Client::connect(client_config(&server), PingClientHandler::new(stats.clone()))
        .unwrap();
    drop(server);

    let result = run_pings(&client, &stats, 3, Duration::from_millis(10));
    assert!(result.is_err());
}
