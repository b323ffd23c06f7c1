use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{Review, ReviewRequest};

/// In-memory review board scoped to one running application.
#[derive(Default)]
pub struct ReviewStore {
    reviews: RwLock<Vec<Review>>,
}

impl ReviewStore {
    pub async fn add(&self, request: ReviewRequest) -> Review {
        let review = Review {
            id: Uuid::new_v4(),
            name: request.name,
            text: request.text,
            created: chrono::Utc::now().timestamp(),
        };
        self.reviews.write().await.push(review.clone());
        review
    }

    pub async fn list(&self) -> Vec<Review> {
        self.reviews.read().await.clone()
    }
}
