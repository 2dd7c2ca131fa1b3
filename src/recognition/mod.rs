pub mod store;
pub mod uploads;
pub mod service;

pub use store::{
    Article, ArticleUpdate, GarbageItem, HistoryRecord, MemoryStore, NewHistory, NewReward,
    QueryType, RecordStatus, Redemption, RedemptionContact, Reward, Role, StoreError, User,
    UserStatus,
};
pub use uploads::{save_upload, upload_extension, is_stored_name, StoredUpload, UploadError};
pub use service::{
    ImageRecognition, RecognitionError, RecognitionService, RecognitionSettings, TextRecognition,
    NOT_FOUND_CATEGORY, TEXT_SEARCH_LIMIT,
};
