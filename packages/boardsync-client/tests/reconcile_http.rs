use boardsync_client::{HttpCommandApi, MoveOutcome, ReconcileError, Reconciler};
use boardsync_core::moves::MoveRequest;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn board_json() -> serde_json::Value {
    serde_json::json!({
        "id": 1, "name": "Sprint", "description": "Q3",
        "columns": [
            {"id": 1, "name": "Todo", "board_id": 1, "position": 0, "tasks": [
                {"id": 10, "title": "T1", "column_id": 1, "priority": "high", "tags": ["api"], "position": 0, "comments": []},
                {"id": 11, "title": "T2", "column_id": 1, "priority": "low", "tags": [], "position": 1, "comments": []}
            ]},
            {"id": 2, "name": "Done", "board_id": 1, "position": 1, "tasks": []}
        ]
    })
}

async fn server_with_board() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/boards/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(board_json()))
        .mount(&server)
        .await;
    server
}

fn move_t1_to_done() -> MoveRequest {
    MoveRequest {
        task_id: 10,
        source_column: 1,
        source_index: 0,
        dest_column: 2,
        dest_index: 0,
    }
}

#[tokio::test]
async fn test_committed_move_over_http() {
    let server = server_with_board().await;
    Mock::given(method("PUT"))
        .and(path("/tasks/10/move"))
        .and(body_json(serde_json::json!({"column_id": 2, "position": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 10})))
        .expect(1)
        .mount(&server)
        .await;

    let reconciler = Reconciler::new(Arc::new(HttpCommandApi::new(&server.uri(), "tok")));
    reconciler.select_board(1).await.unwrap();
    let outcome = reconciler.move_task(move_t1_to_done()).await.unwrap();

    assert_eq!(outcome, MoveOutcome::Committed);
    let board = reconciler.view().unwrap();
    assert_eq!(board.columns[1].tasks[0].id, 10);
    assert_eq!(board.columns[1].tasks[0].column_id, 2);
    assert!(reconciler.last_error().is_none());
}

#[tokio::test]
async fn test_rejected_move_over_http_rolls_back() {
    let server = server_with_board().await;
    Mock::given(method("PUT"))
        .and(path("/tasks/10/move"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({"detail": "Target column not found"})),
        )
        .mount(&server)
        .await;

    let reconciler = Reconciler::new(Arc::new(HttpCommandApi::new(&server.uri(), "tok")));
    reconciler.select_board(1).await.unwrap();
    let before = reconciler.view().unwrap();

    let err = reconciler.move_task(move_t1_to_done()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Api(_)));
    assert_eq!(reconciler.view().unwrap(), before);
    assert_eq!(
        reconciler.take_error().as_deref(),
        Some("Failed to move task: Target column not found")
    );
}

#[tokio::test]
async fn test_noop_move_sends_nothing() {
    let server = server_with_board().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let reconciler = Reconciler::new(Arc::new(HttpCommandApi::new(&server.uri(), "tok")));
    reconciler.select_board(1).await.unwrap();
    let req = MoveRequest {
        dest_column: 1,
        ..move_t1_to_done()
    };
    assert_eq!(reconciler.move_task(req).await.unwrap(), MoveOutcome::NoOp);
}

#[tokio::test]
async fn test_column_rename_over_http_infers_status() {
    let server = server_with_board().await;
    Mock::given(method("PUT"))
        .and(path("/columns/2"))
        .and(body_json(serde_json::json!({"name": "In Progress", "position": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 2, "name": "In Progress", "board_id": 1, "position": 1, "tasks": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reconciler = Reconciler::new(Arc::new(HttpCommandApi::new(&server.uri(), "tok")));
    reconciler.select_board(1).await.unwrap();
    reconciler.rename_column(2, "In Progress").await.unwrap();
    let board = reconciler.view().unwrap();
    let column = board.column(2).unwrap();
    assert_eq!(column.name, "In Progress");
    assert_eq!(
        column.effective_status(),
        Some(boardsync_core::types::ColumnStatus::InProgress)
    );
    assert!(reconciler.last_error().is_none());
}
