pub mod auth;

pub use auth::{
    ActivateRequest, ChangePasswordRequest, LoginRequest, MessageResponse, RefreshRequest,
    RegisterRequest, ResetCodeRequest, ResetPasswordRequest, UserResponse,
};
