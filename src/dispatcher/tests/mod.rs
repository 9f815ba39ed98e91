use super::test_helpers::*;
use super::*;
use crate::event::OnComplete;
use crate::parser::Text;
use crate::types::LifecycleState;
use std::time::Duration;
use url::Url;


fn url(path: &str) -> Url {
    Url::parse(&format!("http://courier.test{}", path)).unwrap()
}

fn get(path: &str) -> RequestTask<Text> {
    RequestTask::get(url(path), Text)
}

/// Wait for a task's terminal state, failing the test after 5s
async fn finished(handle: &TaskHandle) -> LifecycleState {
    tokio::time::timeout(Duration::from_secs(5), handle.finished())
        .await
        .expect("task did not finish within 5s")
}

/// Wait until a task has reached `state`
async fn reached(handle: &TaskHandle, state: LifecycleState) {
    let mut rx = handle.watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached within 5s")
        .expect("task state channel closed");
}

async fn terminated(dispatcher: &Dispatcher) {
    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_terminated())
        .await
        .expect("dispatcher did not terminate within 5s");
}
