//! End-to-end scenarios across the controller, the wire protocol, the
//! federation layer, and the HTTP gateway.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use castellan_controller::address::operation as make_operation;
    use castellan_controller::{keys, ModelController, PathAddress};
    use castellan_protocol::sink::{ChannelSink, SinkEvent};
    use castellan_protocol::{AsyncTerminal, DomainConnection, RemoteControllerClient};
    use castellan_value::Value;

    use crate::integration::fixtures::{
        bad_op, composite, good_op, outcome, start_management_server, test_controller,
        test_model,
    };

    /// Non-recursive read of the root: scalar attributes survive.
    async fn read_root_attrs(client: &RemoteControllerClient) -> (i32, i32) {
        let op = make_operation(keys::READ_RESOURCE, &PathAddress::root());
        let envelope = client.execute(&op).await.unwrap();
        assert_eq!(outcome(&envelope), "success");
        let result = envelope.require(keys::RESULT).unwrap();
        (
            result.require("attr1").unwrap().as_int().unwrap(),
            result.require("attr2").unwrap().as_int().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_good_composite_over_the_wire() {
        let controller = test_controller(test_model());
        let addr = start_management_server(controller).await;
        let client = RemoteControllerClient::new(addr);

        let op = composite(None, &[good_op("attr1", 2), good_op("attr2", 1)]);
        let envelope = client.execute(&op).await.unwrap();

        assert_eq!(outcome(&envelope), "success");
        let steps = envelope.require(keys::RESULT).unwrap();
        assert_eq!(steps.keys(), vec!["step-1", "step-2"]);
        assert_eq!(
            steps.require("step-1").unwrap().require(keys::RESULT).unwrap().as_int().unwrap(),
            1
        );
        assert_eq!(
            steps.require("step-2").unwrap().require(keys::RESULT).unwrap().as_int().unwrap(),
            2
        );

        let compensating = envelope.require(keys::COMPENSATING_OPERATION).unwrap();
        assert_eq!(
            compensating.require(keys::OP).unwrap().as_str().unwrap(),
            keys::COMPOSITE
        );
        assert_eq!(
            compensating.require(keys::STEPS).unwrap().as_list().unwrap().len(),
            2
        );

        assert_eq!(read_root_attrs(&client).await, (2, 1));

        // executing the compensating composite restores the model
        let envelope = client.execute(compensating).await.unwrap();
        assert_eq!(outcome(&envelope), "success");
        assert_eq!(read_root_attrs(&client).await, (1, 2));
    }

    #[tokio::test]
    async fn test_composite_failure_rolls_back_over_the_wire() {
        let controller = test_controller(test_model());
        let addr = start_management_server(controller).await;
        let client = RemoteControllerClient::new(addr);

        let op = composite(None, &[good_op("attr1", 2), bad_op("attr2", 1)]);
        let envelope = client.execute(&op).await.unwrap();

        assert_eq!(outcome(&envelope), "failed");
        assert!(envelope
            .require(keys::FAILURE_DESCRIPTION)
            .unwrap()
            .to_json_string(false)
            .contains("this request is bad"));
        let steps = envelope.require(keys::RESULT).unwrap();
        assert!(steps
            .require("step-1")
            .unwrap()
            .require(keys::ROLLED_BACK)
            .unwrap()
            .as_bool()
            .unwrap());

        assert_eq!(read_root_attrs(&client).await, (1, 2));
    }

    #[tokio::test]
    async fn test_composite_failure_without_rollback_keeps_progress() {
        let controller = test_controller(test_model());
        let addr = start_management_server(controller).await;
        let client = RemoteControllerClient::new(addr);

        let op = composite(Some(false), &[good_op("attr1", 2), bad_op("attr2", 1)]);
        let envelope = client.execute(&op).await.unwrap();

        assert_eq!(outcome(&envelope), "failed");
        assert_eq!(read_root_attrs(&client).await, (2, 2));
    }

    #[tokio::test]
    async fn test_async_cancellation_over_the_wire() {
        let controller = test_controller(test_model());
        let addr = start_management_server(controller).await;
        let client = RemoteControllerClient::new(addr);

        let (sink, mut events) = ChannelSink::new();
        let mut execution = client
            .execute_async(&make_operation("slow", &PathAddress::root()), Arc::new(sink))
            .await
            .unwrap();

        let request_id = execution.request_id().await.expect("an id is issued");
        assert!(client.cancel(request_id).await.unwrap());
        assert!(matches!(events.recv().await.unwrap(), SinkEvent::Cancelled));
        assert_eq!(execution.outcome().await.unwrap(), AsyncTerminal::Cancelled);
        assert!(!client.cancel(request_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_get_reads_the_model() {
        let controller = test_controller(test_model());
        let router = castellan_gateway::router(controller as Arc<dyn ModelController>);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/domain-api/subsystem/web?operation=read-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = Value::from_json_slice(&bytes).unwrap();
        assert_eq!(body.require("port").unwrap().as_int().unwrap(), 8080);
    }

    #[tokio::test]
    async fn test_http_get_through_domain_reaches_federated_host() {
        // a domain controller, with its management endpoint and gateway
        let domain_controller = test_controller(test_model());
        let domain_addr = start_management_server(Arc::clone(&domain_controller)).await;
        let router =
            castellan_gateway::router(Arc::clone(&domain_controller) as Arc<dyn ModelController>);

        // a host controller with a distinguishable model
        let mut host_model = test_model();
        *host_model
            .get_mut("subsystem")
            .unwrap()
            .get_mut("web")
            .unwrap()
            .get_mut("port")
            .unwrap() = Value::Int(9443);
        let host_controller = test_controller(host_model);
        DomainConnection::new(domain_addr, "alpha")
            .register(host_controller as Arc<dyn ModelController>)
            .await
            .unwrap();

        // an HTTP read under /host/alpha lands on the host's model
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/domain-api/host/alpha/subsystem/web")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = Value::from_json_slice(&bytes).unwrap();
        assert_eq!(body.require("port").unwrap().as_int().unwrap(), 9443);
    }
}
