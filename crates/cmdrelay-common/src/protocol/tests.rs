//! Wire-format tests for envelopes.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_client_id_uniqueness() {
        let ids: HashSet<_> = (0..1000).map(|_| ClientId::generate()).collect();
        assert_eq!(ids.len(), 1000, "All client IDs should be unique");
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::new("c1", "click", json!({"selector": "#go"}));
        let value = serde_json::to_value(Envelope::Command(cmd)).unwrap();
        assert_eq!(
            value,
            json!({"type": "command", "id": "c1", "command": "click", "params": {"selector": "#go"}})
        );
    }

    #[test]
    fn test_command_with_target_serializes_target_id() {
        let cmd = Command::new("c1", "click", json!({})).with_target(ClientId::from("exec-1"));
        let value = serde_json::to_value(Envelope::Command(cmd)).unwrap();
        assert_eq!(value["targetId"], "exec-1");
    }

    #[test]
    fn test_register_accepts_legacy_client_type() {
        let env: Envelope = serde_json::from_value(json!({
            "type": "register",
            "clientType": "browser",
            "metadata": {"userAgent": "test"}
        }))
        .unwrap();
        match env {
            Envelope::Register { role, metadata } => {
                assert_eq!(role, Role::Executor);
                assert_eq!(metadata["userAgent"], "test");
            }
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_register_metadata_defaults_to_empty() {
        let env: Envelope =
            serde_json::from_value(json!({"type": "register", "role": "vscode"})).unwrap();
        assert_eq!(
            env,
            Envelope::Register {
                role: Role::Orchestrator,
                metadata: Metadata::new()
            }
        );
    }

    #[test]
    fn test_response_omits_heal_fields_unless_healed() {
        let value = serde_json::to_value(Response::success("c2", json!({"value": 42}))).unwrap();
        assert!(value.get("healed").is_none());
        assert!(value.get("healAttempt").is_none());
        assert!(value.get("error").is_none());

        let healed = Response::success("c3", json!(true)).healed(2, "button");
        let value = serde_json::to_value(healed).unwrap();
        assert_eq!(value["healed"], true);
        assert_eq!(value["healAttempt"], 2);
        assert_eq!(value["descriptor"], "button");
    }

    #[test]
    fn test_failure_response_wire_shape() {
        let env = Envelope::Response(Response::failure(
            "c1",
            ErrorCode::NoTargetAvailable,
            "No executor connected",
        ));
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "NO_BROWSER");
    }

    #[test]
    fn test_registered_uses_camel_case() {
        let env = Envelope::Registered {
            client_id: ClientId::from("abc"),
            role: Role::Executor,
            connected_clients: RoleCounts {
                orchestrator: 1,
                executor: 1,
                total: 2,
            },
        };
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(value["clientId"], "abc");
        assert_eq!(value["connectedClients"]["total"], 2);
    }

    #[test]
    fn test_event_kind_uses_event_field() {
        let env: Envelope = serde_json::from_value(json!({
            "type": "event",
            "event": "page_loaded",
            "data": {"url": "https://example.com"}
        }))
        .unwrap();
        assert_eq!(env.type_name(), "event");
        match env {
            Envelope::Event { kind, .. } => assert_eq!(kind, "page_loaded"),
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_bare_pong_decodes() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::Pong {
                timestamp: 0,
                original_timestamp: None
            }
        );
    }

    #[test]
    fn test_server_shutdown_tag() {
        let value = serde_json::to_value(Envelope::ServerShutdown {
            message: "bye".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "server_shutdown");
    }

    #[test]
    fn test_type_names_are_all_recognized() {
        let samples = [
            Envelope::ping(),
            Envelope::pong(Some(1)),
            Envelope::error(ErrorCode::InvalidSender, "nope"),
            Envelope::Status {
                clients: RoleCounts::default(),
            },
        ];
        for env in samples {
            assert!(MESSAGE_TYPES.contains(&env.type_name()));
        }
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("browser".parse::<Role>().unwrap(), Role::Executor);
        assert_eq!("orchestrator".parse::<Role>().unwrap(), Role::Orchestrator);
        assert!("admin".parse::<Role>().is_err());
    }
}
