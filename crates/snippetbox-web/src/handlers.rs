use axum::Extension;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use snippetbox_db::ModelError;

use crate::AppState;
use crate::error::AppError;
use crate::forms::{
    AccountPasswordUpdateForm, SnippetCreateForm, UserLoginForm, UserSignupForm, decode_post_form,
};
use crate::middleware::CurrentUser;
use crate::session::Session;
use crate::templates::{
    AboutPage, AccountPage, CreatePage, HomePage, LoginPage, PageData, PasswordPage, SignupPage,
    ViewPage, render,
};
use crate::validator::{EMAIL_RX, matches, max_chars, min_chars, not_blank, permitted_value};

pub async fn ping() -> &'static str {
    "OK"
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}

pub async fn home(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let snippets = state.db.latest_snippets()?;
    let page = PageData::new(&session, &current);
    render(StatusCode::OK, &HomePage { page, snippets })
}

pub async fn about(
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let page = PageData::new(&session, &current);
    render(StatusCode::OK, &AboutPage { page })
}

pub async fn snippet_view(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    // Anything that is not a plain integer id is a 404, not a 400.
    let id: i64 = id.parse().map_err(|_| AppError::NotFound)?;

    let snippet = state.db.get_snippet(id)?;

    let page = PageData::new(&session, &current);
    render(StatusCode::OK, &ViewPage { page, snippet })
}

pub async fn snippet_create(
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let page = PageData::new(&session, &current);
    let form = SnippetCreateForm::blank();
    render(StatusCode::OK, &CreatePage { page, form })
}

pub async fn snippet_create_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut form: SnippetCreateForm = decode_post_form(&body)?;

    let v = &mut form.validator;
    v.check_field(not_blank(&form.title), "title", "This field cannot be blank");
    v.check_field(
        max_chars(&form.title, 100),
        "title",
        "This field cannot be more than 100 characters long",
    );
    v.check_field(
        not_blank(&form.content),
        "content",
        "This field cannot be blank",
    );
    v.check_field(
        permitted_value(&form.expires, &[1, 7, 365]),
        "expires",
        "This field must equal 1, 7 or 365",
    );

    if !form.validator.valid() {
        let page = PageData::new(&session, &current);
        return render(StatusCode::UNPROCESSABLE_ENTITY, &CreatePage { page, form });
    }

    let id = state
        .db
        .insert_snippet(&form.title, &form.content, form.expires)?;

    session.put_flash("Snippet created successfully!");

    Ok(Redirect::to(&format!("/snippet/view/{id}")).into_response())
}

pub async fn user_signup(
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let page = PageData::new(&session, &current);
    let form = UserSignupForm::default();
    render(StatusCode::OK, &SignupPage { page, form })
}

pub async fn user_signup_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut form: UserSignupForm = decode_post_form(&body)?;

    let v = &mut form.validator;
    v.check_field(not_blank(&form.name), "name", "This field cannot be blank");
    v.check_field(not_blank(&form.email), "email", "This field cannot be blank");
    v.check_field(
        matches(&form.email, &EMAIL_RX),
        "email",
        "This field must be a valid email address",
    );
    v.check_field(
        not_blank(&form.password),
        "password",
        "This field cannot be blank",
    );
    v.check_field(
        min_chars(&form.password, 8),
        "password",
        "This field must be at least 8 characters long",
    );

    if !form.validator.valid() {
        let page = PageData::new(&session, &current);
        return render(StatusCode::UNPROCESSABLE_ENTITY, &SignupPage { page, form });
    }

    match state.db.insert_user(&form.name, &form.email, &form.password) {
        Ok(_) => {}
        Err(ModelError::DuplicateEmail) => {
            form.validator
                .add_field_error("email", "Email address is already in use");
            let page = PageData::new(&session, &current);
            return render(StatusCode::UNPROCESSABLE_ENTITY, &SignupPage { page, form });
        }
        Err(err) => return Err(err.into()),
    }

    session.put_flash("Your signup was successful. Please log in.");

    Ok(Redirect::to("/user/login").into_response())
}

pub async fn user_login(
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let page = PageData::new(&session, &current);
    let form = UserLoginForm::default();
    render(StatusCode::OK, &LoginPage { page, form })
}

pub async fn user_login_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut form: UserLoginForm = decode_post_form(&body)?;

    let v = &mut form.validator;
    v.check_field(not_blank(&form.email), "email", "This field cannot be blank");
    v.check_field(
        matches(&form.email, &EMAIL_RX),
        "email",
        "This field must be a valid email address",
    );
    v.check_field(
        not_blank(&form.password),
        "password",
        "This field cannot be blank",
    );

    if !form.validator.valid() {
        let page = PageData::new(&session, &current);
        return render(StatusCode::UNPROCESSABLE_ENTITY, &LoginPage { page, form });
    }

    let id = match state.db.authenticate_user(&form.email, &form.password) {
        Ok(id) => id,
        Err(ModelError::InvalidCredentials) => {
            form.validator
                .add_non_field_error("Email or password is incorrect");
            let page = PageData::new(&session, &current);
            return render(StatusCode::UNPROCESSABLE_ENTITY, &LoginPage { page, form });
        }
        Err(err) => return Err(err.into()),
    };

    // New token on the privilege transition, same data.
    session.renew_token();
    session.set_user_id(Some(id));

    let target = session
        .take_redirect_path()
        .unwrap_or_else(|| "/snippet/create".to_string());

    Ok(Redirect::to(&target).into_response())
}

pub async fn user_logout_post(
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    session.renew_token();
    session.set_user_id(None);
    session.put_flash("You have been logged out successfully");

    Ok(Redirect::to("/").into_response())
}

pub async fn account_view(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let Some(id) = current.0 else {
        return Ok(Redirect::to("/user/login").into_response());
    };

    let user = match state.db.get_user(id) {
        Ok(user) => user,
        // The account disappeared underneath the session.
        Err(ModelError::NoRecord) => return Ok(Redirect::to("/user/login").into_response()),
        Err(err) => return Err(err.into()),
    };

    let page = PageData::new(&session, &current);
    render(StatusCode::OK, &AccountPage { page, user })
}

pub async fn account_password_update(
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let page = PageData::new(&session, &current);
    let form = AccountPasswordUpdateForm::default();
    render(StatusCode::OK, &PasswordPage { page, form })
}

pub async fn account_password_update_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut form: AccountPasswordUpdateForm = decode_post_form(&body)?;

    let v = &mut form.validator;
    v.check_field(
        not_blank(&form.current_password),
        "current_password",
        "This field cannot be blank",
    );
    v.check_field(
        not_blank(&form.new_password),
        "new_password",
        "This field cannot be blank",
    );
    v.check_field(
        min_chars(&form.new_password, 8),
        "new_password",
        "This field must be at least 8 characters long",
    );
    v.check_field(
        not_blank(&form.new_password_confirmation),
        "new_password_confirmation",
        "This field cannot be blank",
    );
    v.check_field(
        form.new_password == form.new_password_confirmation,
        "new_password_confirmation",
        "Passwords must match",
    );

    if !form.validator.valid() {
        let page = PageData::new(&session, &current);
        return render(
            StatusCode::UNPROCESSABLE_ENTITY,
            &PasswordPage { page, form },
        );
    }

    let Some(id) = current.0 else {
        return Ok(Redirect::to("/user/login").into_response());
    };

    match state
        .db
        .update_user_password(id, &form.current_password, &form.new_password)
    {
        Ok(()) => {}
        Err(ModelError::InvalidCredentials) => {
            form.validator
                .add_field_error("current_password", "Current password is incorrect");
            let page = PageData::new(&session, &current);
            return render(
                StatusCode::UNPROCESSABLE_ENTITY,
                &PasswordPage { page, form },
            );
        }
        Err(err) => return Err(err.into()),
    }

    session.put_flash("Your password has been updated.");

    Ok(Redirect::to("/account/view").into_response())
}
