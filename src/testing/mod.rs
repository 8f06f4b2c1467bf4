//! Testing infrastructure.
//!
//! Mocks for the search backend so the manager factory and dispatcher can be
//! exercised without touching a real index:
//! - [`MockIndexer`] counts index/delete/close calls
//! - [`MockIndexerFactory`] opens mock indexes, optionally slowly or failing
//!
//! # Example
//!
//! ```rust,ignore
//! use todo_mcp::testing::MockIndexerFactory;
//!
//! let indexers = MockIndexerFactory::new().with_delay(Duration::from_secs(60));
//! ```

pub mod mocks;

pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexerFactory, SearchFilters, TodoIndexer};
    use crate::paths::WorkingPaths;
    use crate::todo::{Priority, Todo, TodoStatus, TodoType};

    fn todo(id: &str) -> Todo {
        Todo {
            id: id.into(),
            task: format!("Task {id}"),
            started: chrono::Local::now(),
            completed: None,
            status: TodoStatus::InProgress,
            priority: Priority::High,
            todo_type: TodoType::Feature,
            parent_id: None,
            current_test: None,
            tags: vec![],
            sections: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_mock_indexer_tracks_calls() {
        let index = MockIndexer::new();
        index.index_todo(&todo("a"), "Body text").await.unwrap();
        assert!(index.contains("a"));
        assert_eq!(
            index
                .search_todos("body", &SearchFilters::default(), 5)
                .await
                .unwrap()
                .len(),
            1
        );
        index.delete_todo("a").await.unwrap();
        index.close().await.unwrap();

        assert_eq!(index.index_count(), 1);
        assert_eq!(index.delete_count(), 1);
        assert_eq!(index.close_count(), 1);
        assert_eq!(index.indexed_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_indexer_failing_writes() {
        let index = MockIndexer::new().with_failing_writes();
        assert!(index.index_todo(&todo("a"), "").await.is_err());
        assert!(!index.contains("a"));
    }

    #[tokio::test]
    async fn test_mock_factory_records_opens() {
        let factory = MockIndexerFactory::new();
        let paths = WorkingPaths::from_root("/tmp/unused");
        factory.open(&paths).await.unwrap();
        assert_eq!(factory.open_count(), 1);
        assert_eq!(factory.created().len(), 1);

        let failing = MockIndexerFactory::new().failing();
        assert!(failing.open(&paths).await.is_err());
        assert_eq!(failing.open_count(), 1);
        assert!(failing.created().is_empty());
    }
}
