//! Healthcheck behavior on sealed and unsealed backends.

use e2e::Stack;

#[tokio::test]
async fn healthcheck_round_trip() {
    let stack = Stack::bring_up().await;
    let http = reqwest::Client::new();
    let url = format!("{}/v1/sms/healthcheck", stack.base_url);

    // Sealed backend: the probe fails.
    let resp = http.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 500);

    // Unsealed: the probe creates and deletes a throwaway domain.
    stack.sim.force_unseal();
    let resp = http.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    assert!(
        stack
            .sim
            .mount_names()
            .iter()
            .all(|m| !m.contains("healthcheck-")),
        "no residual healthcheck domain remains"
    );
}
